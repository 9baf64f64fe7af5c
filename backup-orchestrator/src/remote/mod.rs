//! Remote host access: the reachability check and the archive transfer.
//!
//! Both go through the same login and key. The check uses an in-process SSH
//! session; the transfer mirrors the archive store with rsync over ssh.

pub mod push;

use crate::config::Config;
use crate::{OrchestratorError, Result};
use ssh2::{CheckResult, KnownHostFileKind, KnownHosts, Session};
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info};

pub use push::{PushMarker, PushOutcome, Pusher};

/// A place the archive store is pushed to.
pub trait RemoteEndpoint: Send + Sync {
    /// Non-interactive login check; an error aborts the run.
    fn check(&self) -> Result<()>;

    /// Mirror `archive_store` to the remote destination.
    fn push(&self, archive_store: &Path) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct SshRemote {
    user: String,
    host: String,
    port: u16,
    identity_file: Option<PathBuf>,
    known_hosts: Option<PathBuf>,
    target_dir: String,
    connect_timeout: Duration,
    rsync: String,
    remote_shell: String,
}

impl SshRemote {
    /// Fails for key or known hosts paths that cannot be quoted for
    /// rsync's `-e` command.
    pub fn from_config(config: &Config) -> Result<Self> {
        let known_hosts = config.known_hosts_file();
        let remote_shell = build_remote_shell(
            &config.tools.ssh,
            config.remote.port,
            config.remote.identity_file.as_deref(),
            known_hosts.as_deref(),
            config.connect_timeout(),
        )?;
        Ok(Self {
            user: config.remote.user.clone(),
            host: config.remote.host.clone(),
            port: config.remote.port,
            identity_file: config.remote.identity_file.clone(),
            known_hosts,
            target_dir: config.remote.target_dir.clone(),
            connect_timeout: config.connect_timeout(),
            rsync: config.tools.rsync.clone(),
            remote_shell,
        })
    }

    /// `user@host:target_dir/`
    pub fn destination(&self) -> String {
        format!(
            "{}@{}:{}/",
            self.user,
            self.host,
            self.target_dir.trim_end_matches('/')
        )
    }

    /// Remote shell handed to rsync with `-e`.
    pub fn remote_shell(&self) -> &str {
        &self.remote_shell
    }

    /// Arguments of the rsync transfer, without the program name.
    pub fn rsync_args(&self, archive_store: &Path) -> Vec<String> {
        vec![
            "-a".to_string(),
            "--delete".to_string(),
            "-e".to_string(),
            self.remote_shell.clone(),
            format!("{}/", archive_store.display().to_string().trim_end_matches('/')),
            self.destination(),
        ]
    }

    fn open_session(&self) -> Result<Session> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| OrchestratorError::Unreachable(format!("{}: {}", self.host, e)))?
            .next()
            .ok_or_else(|| {
                OrchestratorError::Unreachable(format!("{}: no address found", self.host))
            })?;

        let tcp = TcpStream::connect_timeout(&addr, self.connect_timeout)
            .map_err(|e| OrchestratorError::Unreachable(format!("{}: {}", addr, e)))?;
        tcp.set_read_timeout(Some(self.connect_timeout))?;
        tcp.set_write_timeout(Some(self.connect_timeout))?;

        let mut sess = Session::new()?;
        sess.set_timeout(self.connect_timeout.as_millis().min(u32::MAX as u128) as u32);
        sess.set_tcp_stream(tcp);
        sess.handshake()?;
        self.verify_host_key(&sess)?;

        match &self.identity_file {
            Some(key) => sess.userauth_pubkey_file(&self.user, None, key, None),
            None => sess.userauth_agent(&self.user),
        }
        .map_err(|e| OrchestratorError::Unreachable(format!("authentication failed: {}", e)))?;

        if !sess.authenticated() {
            return Err(OrchestratorError::Unreachable(
                "authentication failed".to_string(),
            ));
        }
        Ok(sess)
    }
}

impl SshRemote {
    /// Accept only hosts whose key is already in the known hosts file,
    /// which is what ssh in batch mode accepts for the transfer.
    fn verify_host_key(&self, sess: &Session) -> Result<()> {
        let path = self.known_hosts.as_ref().ok_or_else(|| {
            OrchestratorError::Unreachable("no known_hosts file to verify the host key".to_string())
        })?;
        let mut known = sess.known_hosts()?;
        known
            .read_file(path, KnownHostFileKind::OpenSSH)
            .map_err(|e| {
                OrchestratorError::Unreachable(format!("cannot read {}: {}", path.display(), e))
            })?;
        let (key, _) = sess.host_key().ok_or_else(|| {
            OrchestratorError::Unreachable(format!("{} sent no host key", self.host))
        })?;
        check_host_key(&known, &self.host, self.port, key)
    }
}

/// Compare a server key with the trusted entries.
fn check_host_key(known: &KnownHosts, host: &str, port: u16, key: &[u8]) -> Result<()> {
    match known.check_port(host, port, key) {
        CheckResult::Match => Ok(()),
        CheckResult::NotFound => Err(OrchestratorError::Unreachable(format!(
            "host key for {} is not in known_hosts",
            host
        ))),
        CheckResult::Mismatch => Err(OrchestratorError::Unreachable(format!(
            "host key for {} does not match known_hosts",
            host
        ))),
        CheckResult::Failure => Err(OrchestratorError::Unreachable(format!(
            "host key check for {} failed",
            host
        ))),
    }
}

/// ssh command for rsync's `-e`. Host keys are checked against the same
/// file the check uses.
fn build_remote_shell(
    ssh: &str,
    port: u16,
    identity_file: Option<&Path>,
    known_hosts: Option<&Path>,
    connect_timeout: Duration,
) -> Result<String> {
    let mut shell = format!("{} -p {}", ssh, port);
    if let Some(key) = identity_file {
        shell.push_str(&format!(" -i {}", rsync_word(&key.display().to_string())?));
    }
    if let Some(known_hosts) = known_hosts {
        // ssh splits option values on spaces unless double-quoted
        let file = known_hosts.display().to_string();
        let value = if file.contains(' ') {
            format!("\"{}\"", file)
        } else {
            file
        };
        let option = format!("UserKnownHostsFile={}", value);
        shell.push_str(&format!(" -o {}", rsync_word(&option)?));
    }
    shell.push_str(&format!(
        " -o BatchMode=yes -o StrictHostKeyChecking=yes -o ConnectTimeout={}",
        connect_timeout.as_secs().max(1)
    ));
    Ok(shell)
}

/// Quote `word` so rsync keeps it as one argument of the `-e` command.
/// rsync honors single and double quotes there but not backslashes.
fn rsync_word(word: &str) -> Result<String> {
    if !word.contains([' ', '\'', '"']) {
        Ok(word.to_string())
    } else if !word.contains('\'') {
        Ok(format!("'{}'", word))
    } else if !word.contains('"') {
        Ok(format!("\"{}\"", word))
    } else {
        Err(OrchestratorError::Config(format!(
            "cannot quote for the rsync remote shell: {}",
            word
        )))
    }
}

impl RemoteEndpoint for SshRemote {
    fn check(&self) -> Result<()> {
        debug!(host = %self.host, port = self.port, user = %self.user, "Checking remote");
        self.run_liveness_check().map_err(|e| match e {
            OrchestratorError::Unreachable(_) => e,
            other => OrchestratorError::Unreachable(format!("{}: {}", self.host, other)),
        })?;
        info!(host = %self.host, "Remote reachable");
        Ok(())
    }

    fn push(&self, archive_store: &Path) -> Result<()> {
        let args = self.rsync_args(archive_store);
        debug!(rsync = %self.rsync, ?args, "Starting transfer");

        let output = Command::new(&self.rsync)
            .args(&args)
            .output()
            .map_err(|e| OrchestratorError::Transfer(format!("cannot run {}: {}", self.rsync, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OrchestratorError::Transfer(format!(
                "rsync exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

impl SshRemote {
    /// Log in and run `true`; it must exit 0.
    fn run_liveness_check(&self) -> Result<()> {
        let sess = self.open_session()?;

        let mut channel = sess.channel_session()?;
        channel.exec("true")?;
        let mut sink = String::new();
        channel.read_to_string(&mut sink)?;
        channel.wait_close()?;

        let status = channel.exit_status()?;
        if status != 0 {
            return Err(OrchestratorError::Unreachable(format!(
                "liveness check exited with status {}",
                status
            )));
        }
        Ok(())
    }
}
