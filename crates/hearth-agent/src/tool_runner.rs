use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::Context;
use futures_util::StreamExt;
use hearth_process::LogLevel;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Command,
    sync::Mutex,
    time::Instant,
};
use uuid::Uuid;

use crate::{audit::AuditSink, config::SteamCredentials};

pub const TOOL_SOURCE: &str = "tool";

// SteamCMD's own exit code for a rejected login.
const LOGIN_FAILED_EXIT_CODE: i32 = 5;
const SPAWN_FAILED_EXIT_CODE: i32 = -1;

const STEAMCMD_URL: &str = "https://steamcdn-a.akamaihd.net/client/installer/steamcmd_linux.tar.gz";

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("tool operation failed with exit code {exit_code} after {attempts} attempt(s)")]
    OperationFailed { exit_code: i32, attempts: u32 },

    #[error("tool requires a login but no credentials are configured")]
    MissingCredentials,

    #[error("tool is unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub server_id: Uuid,
    pub install_dir: Option<PathBuf>,
    pub commands: Vec<String>,
}

impl ToolInvocation {
    pub fn new(server_id: Uuid, commands: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            server_id,
            install_dir: None,
            commands: commands.into_iter().map(Into::into).collect(),
        }
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.install_dir = Some(dir.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct ToolRunnerOptions {
    pub program: Option<PathBuf>,
    pub cache_dir: PathBuf,
    pub max_attempts: u32,
    pub cooldown: Duration,
}

/// Invocations are serialized across the whole agent and spaced by `cooldown`.
pub struct ToolRunner {
    opts: ToolRunnerOptions,
    sink: AuditSink,
    program: Mutex<Option<PathBuf>>,
    serial: Mutex<()>,
    last_finished: Mutex<Option<Instant>>,
}

impl ToolRunner {
    pub fn new(opts: ToolRunnerOptions, sink: AuditSink) -> Self {
        Self {
            program: Mutex::new(opts.program.clone()),
            opts,
            sink,
            serial: Mutex::new(()),
            last_finished: Mutex::new(None),
        }
    }

    pub async fn run(
        &self,
        inv: &ToolInvocation,
        requires_login: bool,
        credentials: Option<&SteamCredentials>,
    ) -> Result<i32, ToolError> {
        let login = match (requires_login, credentials) {
            (false, _) => None,
            (true, Some(c)) if c.is_complete() => Some(c),
            (true, _) => return Err(ToolError::MissingCredentials),
        };

        let program = self.program().await?;
        let _serial = self.serial.lock().await;
        self.wait_cooldown().await;

        let args = build_args(inv, login);
        let shown = redact_args(&args, login);
        let max = self.opts.max_attempts.max(1);
        let mut last_code = SPAWN_FAILED_EXIT_CODE;

        for attempt in 1..=max {
            self.sink
                .log(
                    inv.server_id,
                    LogLevel::Info,
                    format!("tool attempt {attempt}/{max}: {} {shown}", program.display()),
                    TOOL_SOURCE,
                )
                .await;

            match self.run_once(&program, &args, inv.server_id).await {
                Ok(0) => {
                    self.mark_finished().await;
                    self.sink
                        .log(
                            inv.server_id,
                            LogLevel::Info,
                            format!("tool attempt {attempt}/{max} succeeded"),
                            TOOL_SOURCE,
                        )
                        .await;
                    return Ok(0);
                }
                Ok(code) => {
                    last_code = code;
                    tracing::warn!(server_id = %inv.server_id, attempt, exit_code = code, "tool attempt failed");
                    self.sink
                        .log(
                            inv.server_id,
                            LogLevel::Warning,
                            format!("tool attempt {attempt}/{max} failed with exit code {code}"),
                            TOOL_SOURCE,
                        )
                        .await;
                }
                Err(err) => {
                    last_code = SPAWN_FAILED_EXIT_CODE;
                    tracing::warn!(server_id = %inv.server_id, attempt, %err, "tool attempt could not run");
                    self.sink
                        .log(
                            inv.server_id,
                            LogLevel::Error,
                            format!("tool attempt {attempt}/{max} could not run: {err:#}"),
                            TOOL_SOURCE,
                        )
                        .await;
                }
            }
        }

        self.mark_finished().await;
        Err(ToolError::OperationFailed {
            exit_code: last_code,
            attempts: max,
        })
    }

    async fn run_once(&self, program: &Path, args: &[String], server_id: Uuid) -> anyhow::Result<i32> {
        let mut cmd = Command::new(program);
        if let Some(dir) = program.parent().filter(|p| !p.as_os_str().is_empty()) {
            cmd.current_dir(dir);
        }
        if self.opts.program.is_none() {
            let home = steamcmd_dir(&self.opts.cache_dir).join("home");
            tokio::fs::create_dir_all(&home).await.ok();
            cmd.env("HOME", home);
        }
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawn {}", program.display()))?;

        let login_failed = Arc::new(AtomicBool::new(false));
        let stdout = child
            .stdout
            .take()
            .map(|s| tokio::spawn(pump(s, self.sink.clone(), server_id, LogLevel::Info, login_failed.clone())));
        let stderr = child
            .stderr
            .take()
            .map(|s| tokio::spawn(pump(s, self.sink.clone(), server_id, LogLevel::Warning, login_failed.clone())));

        let status = child
            .wait()
            .await
            .with_context(|| format!("wait {}", program.display()))?;

        // Let the pumps drain so the attempt's output lands before its verdict.
        for task in [stdout, stderr].into_iter().flatten() {
            task.await.ok();
        }

        let code = status.code().unwrap_or(SPAWN_FAILED_EXIT_CODE);
        if code == 0 && login_failed.load(Ordering::SeqCst) {
            return Ok(LOGIN_FAILED_EXIT_CODE);
        }
        Ok(code)
    }

    async fn wait_cooldown(&self) {
        let last = *self.last_finished.lock().await;
        if let Some(at) = last {
            let ready = at + self.opts.cooldown;
            let now = Instant::now();
            if ready > now {
                tracing::debug!(wait_ms = (ready - now).as_millis() as u64, "tool cooldown");
                tokio::time::sleep_until(ready).await;
            }
        }
    }

    async fn mark_finished(&self) {
        *self.last_finished.lock().await = Some(Instant::now());
    }

    async fn program(&self) -> Result<PathBuf, ToolError> {
        let mut slot = self.program.lock().await;
        if let Some(p) = slot.as_ref() {
            return Ok(p.clone());
        }
        let sh = ensure_steamcmd(&self.opts.cache_dir)
            .await
            .map_err(|e| ToolError::Unavailable(format!("{e:#}")))?;
        *slot = Some(sh.clone());
        Ok(sh)
    }
}

async fn pump<R: AsyncRead + Unpin>(
    reader: R,
    sink: AuditSink,
    server_id: Uuid,
    level: LogLevel,
    login_failed: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let lower = line.to_ascii_lowercase();
        if steamcmd_login_failed(&lower) || steamcmd_guard_required(&lower) {
            login_failed.store(true, Ordering::SeqCst);
        }
        sink.log(server_id, level, line, TOOL_SOURCE).await;
    }
}

fn build_args(inv: &ToolInvocation, login: Option<&SteamCredentials>) -> Vec<String> {
    let mut args = Vec::new();
    // force_install_dir must come before login.
    if let Some(dir) = &inv.install_dir {
        args.push("+force_install_dir".to_string());
        args.push(dir.display().to_string());
    }
    args.push("+login".to_string());
    match login {
        Some(c) => {
            args.push(c.username.clone());
            args.push(c.password.clone());
        }
        None => args.push("anonymous".to_string()),
    }
    args.extend(inv.commands.iter().cloned());
    args.push("+quit".to_string());
    args
}

fn redact_args(args: &[String], login: Option<&SteamCredentials>) -> String {
    args.iter()
        .map(|a| match login {
            Some(c) if *a == c.password => "<redacted>",
            _ => a.as_str(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn steamcmd_login_failed(lower: &str) -> bool {
    lower.contains("login failure")
        || lower.contains("invalid password")
        || lower.contains("account logon denied")
        || lower.contains("incorrect login")
}

fn steamcmd_guard_required(lower: &str) -> bool {
    lower.contains("this computer has not been authenticated")
        || lower.contains("steam guard code")
        || lower.contains("two-factor")
}

fn steamcmd_dir(cache_dir: &Path) -> PathBuf {
    cache_dir.join("steamcmd")
}

fn http_client() -> anyhow::Result<&'static reqwest::Client> {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    if let Some(c) = CLIENT.get() {
        return Ok(c);
    }
    let client = reqwest::Client::builder()
        .user_agent("hearth-agent")
        .timeout(Duration::from_secs(10 * 60))
        .build()
        .context("build http client")?;
    Ok(CLIENT.get_or_init(|| client))
}

async fn download_to_path(url: &str, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let resp = http_client()?
        .get(url)
        .send()
        .await
        .with_context(|| format!("download {url}"))?
        .error_for_status()
        .with_context(|| format!("download {url} (status)"))?;

    let tmp = path.with_extension("tmp");
    let mut f = tokio::fs::File::create(&tmp).await?;
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        tokio::io::AsyncWriteExt::write_all(&mut f, &chunk).await?;
    }
    tokio::io::AsyncWriteExt::flush(&mut f).await.ok();
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn ensure_steamcmd(cache_dir: &Path) -> anyhow::Result<PathBuf> {
    let dir = steamcmd_dir(cache_dir);
    let sh = dir.join("steamcmd.sh");
    if sh.exists() {
        return Ok(sh);
    }

    tokio::fs::create_dir_all(&dir).await?;
    let tgz = dir.join("steamcmd_linux.tar.gz");
    download_to_path(STEAMCMD_URL, &tgz)
        .await
        .context("download steamcmd tar.gz")?;

    // Extract using system tar to keep dependencies minimal.
    let status = Command::new("tar")
        .arg("-xzf")
        .arg(&tgz)
        .arg("-C")
        .arg(&dir)
        .status()
        .await
        .context("extract steamcmd (tar)")?;
    if !status.success() {
        anyhow::bail!("steamcmd extract failed (tar exit {})", status);
    }

    if !sh.exists() {
        anyhow::bail!("steamcmd.sh not found after extract");
    }
    tracing::info!(path = %sh.display(), "steamcmd bootstrapped");
    Ok(sh)
}
