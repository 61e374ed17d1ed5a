//! Shell spawn policy
//!
//! Decides what command each PTY runs. When a target user is configured
//! or auto-detected (and the agent has the privilege to switch), shells
//! are spawned through a login mechanism that loads that user's profile
//! in their home directory. Otherwise a direct shell runs as the current
//! user, preferring zsh over bash over sh.

use std::path::Path;

use portable_pty::CommandBuilder;

use nexus_core::config::AgentConfig;

/// Candidate shells, most preferred first
const SHELL_CANDIDATES: &[&str] = &[
    "/bin/zsh",
    "/usr/bin/zsh",
    "/bin/bash",
    "/usr/bin/bash",
    "/bin/sh",
];

/// uid range of regular local users
const UID_MIN: u32 = 1000;
const UID_MAX: u32 = 65534; // exclusive; 65534 itself is nobody on many systems

/// Resolved spawn policy for this agent
#[derive(Debug, Clone)]
pub struct SpawnPolicy {
    /// Spawn as this user via `su -l`
    pub target_user: Option<String>,
    /// Shell override for direct spawns
    pub shell: Option<String>,
}

impl SpawnPolicy {
    /// Resolve the policy from configuration and the local environment.
    ///
    /// Auto-detection of a target user only applies when the agent runs
    /// as root; without that privilege `su` would prompt for a password
    /// inside the PTY.
    pub fn from_config(config: &AgentConfig) -> Self {
        let target_user = config.run_as_user.clone().or_else(|| {
            if is_root() {
                detect_target_user()
            } else {
                None
            }
        });

        if let Some(user) = &target_user {
            tracing::info!("Shells will run as user {}", user);
        }

        Self {
            target_user,
            shell: config.shell.clone(),
        }
    }

    /// Build the command a new PTY should run
    pub fn build_command(&self) -> CommandBuilder {
        let mut cmd = match &self.target_user {
            Some(user) => {
                // Login via su loads the user's profile and lands in
                // their home directory.
                let mut cmd = CommandBuilder::new("su");
                cmd.arg("-l");
                cmd.arg(user);
                cmd
            }
            None => CommandBuilder::new(default_shell(self.shell.as_deref())),
        };

        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");
        if !std::env::var("LANG")
            .map(|lang| lang.contains("UTF-8"))
            .unwrap_or(false)
        {
            cmd.env("LANG", "C.UTF-8");
        }

        cmd
    }
}

/// Pick the shell for a direct spawn
fn default_shell(shell_override: Option<&str>) -> String {
    if let Some(shell) = shell_override {
        return shell.to_string();
    }
    SHELL_CANDIDATES
        .iter()
        .find(|candidate| Path::new(candidate).exists())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "/bin/sh".to_string())
}

fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Auto-detect the first regular local user
pub fn detect_target_user() -> Option<String> {
    let passwd = std::fs::read_to_string("/etc/passwd").ok()?;
    first_login_user(&passwd)
}

/// First passwd entry with a uid in the regular-user range, excluding
/// `nobody`
fn first_login_user(passwd: &str) -> Option<String> {
    for line in passwd.lines() {
        let mut fields = line.split(':');
        let name = match fields.next() {
            Some(name) if !name.is_empty() => name,
            _ => continue,
        };
        // Skip the password field; the third field is the uid.
        let uid: u32 = match fields.nth(1).and_then(|f| f.parse().ok()) {
            Some(uid) => uid,
            None => continue,
        };

        if (UID_MIN..UID_MAX).contains(&uid) && name != "nobody" {
            return Some(name.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASSWD: &str = "\
root:x:0:0:root:/root:/bin/bash
daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin
systemd-network:x:998:998::/:/usr/sbin/nologin
alice:x:1000:1000:Alice:/home/alice:/bin/zsh
bob:x:1001:1001:Bob:/home/bob:/bin/bash
nobody:x:65534:65534:nobody:/nonexistent:/usr/sbin/nologin
";

    #[test]
    fn test_first_login_user_skips_system_accounts() {
        assert_eq!(first_login_user(PASSWD).as_deref(), Some("alice"));
    }

    #[test]
    fn test_first_login_user_excludes_nobody() {
        let passwd = "\
root:x:0:0:root:/root:/bin/bash
nobody:x:65534:65534:nobody:/nonexistent:/usr/sbin/nologin
";
        assert_eq!(first_login_user(passwd), None);
    }

    #[test]
    fn test_first_login_user_handles_malformed_lines() {
        let passwd = "garbage\nalice:x:notanumber:1000::/home/alice:/bin/sh\nbob:x:1000:1000::/home/bob:/bin/sh\n";
        assert_eq!(first_login_user(passwd).as_deref(), Some("bob"));
    }

    #[test]
    fn test_first_login_user_empty() {
        assert_eq!(first_login_user(""), None);
    }

    #[test]
    fn test_default_shell_override() {
        assert_eq!(default_shell(Some("/opt/fish")), "/opt/fish");
    }

    #[test]
    fn test_default_shell_exists() {
        // Whatever is picked must be one of the candidates (or the final
        // fallback), and /bin/sh exists on any Unix this runs on.
        let shell = default_shell(None);
        assert!(SHELL_CANDIDATES.contains(&shell.as_str()) || shell == "/bin/sh");
    }

    #[test]
    fn test_uid_window() {
        let low = "svc:x:999:999::/:/bin/false\n";
        assert_eq!(first_login_user(low), None);

        let edge = "edge:x:65533:65533::/home/edge:/bin/sh\n";
        assert_eq!(first_login_user(edge).as_deref(), Some("edge"));
    }
}
