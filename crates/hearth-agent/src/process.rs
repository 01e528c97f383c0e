use std::{fmt, path::PathBuf, process::Stdio};

use anyhow::Context;
use hearth_process::LogLevel;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, Command},
    task::JoinHandle,
};
use uuid::Uuid;

use crate::audit::AuditSink;

/// Everything needed to spawn one game server process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub redirect_stdout: bool,
    pub redirect_stderr: bool,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            redirect_stdout: true,
            redirect_stderr: true,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for LaunchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for a in &self.args {
            write!(f, " {a}")?;
        }
        write!(f, " (cwd {})", self.working_dir.display())
    }
}

#[cfg(target_os = "linux")]
unsafe fn set_parent_death_signal() -> std::io::Result<()> {
    // If the agent dies the child goes with it; nothing survives a restart.
    let rc = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) };
    if rc == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(all(unix, not(target_os = "linux")))]
unsafe fn set_parent_death_signal() -> std::io::Result<()> {
    Ok(())
}

/// Spawns the process in its own process group so signals reach the whole
/// tree. Unredirected streams are discarded.
pub fn spawn(spec: &LaunchSpec) -> anyhow::Result<Child> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .current_dir(&spec.working_dir)
        .stdin(Stdio::null())
        .stdout(if spec.redirect_stdout {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stderr(if spec.redirect_stderr {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .kill_on_drop(true);

    #[cfg(unix)]
    {
        unsafe {
            cmd.pre_exec(|| {
                set_parent_death_signal()?;
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    cmd.spawn()
        .with_context(|| format!("spawn {} (cwd {})", spec.program.display(), spec.working_dir.display()))
}

/// Asks the process group led by `pid` to shut down.
#[cfg(unix)]
pub fn terminate_group(pid: u32) -> std::io::Result<()> {
    signal_group(pid, libc::SIGTERM)
}

#[cfg(unix)]
pub fn kill_group(pid: u32) -> std::io::Result<()> {
    signal_group(pid, libc::SIGKILL)
}

#[cfg(unix)]
fn signal_group(pid: u32, sig: libc::c_int) -> std::io::Result<()> {
    let pgid = i32::try_from(pid)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range"))?;
    let rc = unsafe { libc::kill(-pgid, sig) };
    if rc == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn terminate_group(_pid: u32) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "graceful termination is not supported on this platform",
    ))
}

#[cfg(not(unix))]
pub fn kill_group(_pid: u32) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "process groups are not supported on this platform",
    ))
}

/// Forwards every line of `reader` to the sink until EOF.
pub fn pump_lines<R>(
    reader: R,
    sink: AuditSink,
    server_id: Uuid,
    level: LogLevel,
    source: String,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            sink.log(server_id, level, line, &source).await;
        }
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawned_child_leads_its_own_group() {
        let spec = LaunchSpec::new("/bin/sh", "/").args(["-c", "exec sleep 30"]);
        let mut child = spawn(&spec).unwrap();
        let pid = child.id().unwrap();

        let pgid = unsafe { libc::getpgid(pid as i32) };
        assert_eq!(pgid, pid as i32);

        terminate_group(pid).unwrap();
        let status = child.wait().await.unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn missing_program_reports_path() {
        let spec = LaunchSpec::new("/nonexistent/arma3server_x64", "/");
        let err = spawn(&spec).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/arma3server_x64"));
    }

    #[test]
    fn display_lists_args_and_cwd() {
        let spec = LaunchSpec::new("/srv/a3/arma3server_x64", "/srv/a3").args(["-port=2302", "-autoInit"]);
        assert_eq!(
            spec.to_string(),
            "/srv/a3/arma3server_x64 -port=2302 -autoInit (cwd /srv/a3)"
        );
    }
}
