//! Remote command composition and quoting.
//!
//! Everything here is pure string building: POSIX shell quoting for the
//! remote side, Tcl quoting for the `expect` dialogue, and the sudo
//! wrapper used by the privileged actions.

use std::time::Duration;

/// Exit status the dialogue script uses when its timeout fires.
pub const DIALOGUE_TIMEOUT_STATUS: i32 = 124;

/// Exit status the dialogue script uses on "Permission denied".
pub const AUTH_FAILURE_STATUS: i32 = 255;

/// Placeholder printed in place of a password.
const REDACTED: &str = "***";

/// Quote `s` as a single POSIX shell word.
pub fn shell_single_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Wrap a privileged command in sudo.
///
/// With a password, the password is piped to sudo with the prompt
/// suppressed. Without one, sudo runs non-interactively and fails unless a
/// cached credential or NOPASSWD rule exists.
pub fn sudo_wrap(base: &str, password: Option<&str>) -> String {
    match password.filter(|p| !p.is_empty()) {
        Some(pw) => format!("printf %s {} | sudo -S -p '' {base}", shell_single_quote(pw)),
        None => format!("sudo -n {base}"),
    }
}

/// `sudo_wrap` with the password replaced, for logging.
pub fn sudo_wrap_redacted(base: &str, password: Option<&str>) -> String {
    sudo_wrap(base, password.filter(|p| !p.is_empty()).map(|_| REDACTED))
}

/// Run `command` through a login shell on the remote side.
pub fn login_shell(command: &str) -> String {
    format!("sh -lc {}", shell_single_quote(command))
}

/// Quote `s` as a Tcl double-quoted word.
pub fn tcl_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' | '"' | '$' | '[' | ']' => {
                out.push('\\');
                out.push(c);
            }
            '\n' => out.push_str(r"\n"),
            '\r' => out.push_str(r"\r"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Build the `expect` dialogue that drives an interactive ssh login.
///
/// The script answers the password prompt and the first-connection host
/// key question, exits with [`AUTH_FAILURE_STATUS`] on "Permission denied"
/// and with [`DIALOGUE_TIMEOUT_STATUS`] on timeout. Otherwise it waits for
/// ssh and exits with its status.
pub fn expect_script(spawn: &[String], password: &str, timeout: Duration) -> String {
    let spawn_line = spawn
        .iter()
        .map(|arg| tcl_quote(arg))
        .collect::<Vec<_>>()
        .join(" ");
    let password = tcl_quote(password);
    let password = &password[1..password.len() - 1];

    format!(
        r#"set timeout {timeout}
log_user 1
spawn -noecho {spawn_line}
expect {{
  -re {{(?i)password:}} {{ send -- "{password}\r"; exp_continue }}
  -re {{Are you sure you want to continue connecting}} {{ send -- "yes\r"; exp_continue }}
  -re {{Permission denied}} {{ exit {auth} }}
  timeout {{ exit {timed_out} }}
  eof
}}
lassign [wait] pid spawnid os_error value
exit $value
"#,
        timeout = timeout.as_secs().max(1),
        auth = AUTH_FAILURE_STATUS,
        timed_out = DIALOGUE_TIMEOUT_STATUS,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_quote_escapes_embedded_quotes() {
        assert_eq!(shell_single_quote("plain"), "'plain'");
        assert_eq!(shell_single_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_single_quote(""), "''");
    }

    #[test]
    fn sudo_with_password_pipes_it() {
        assert_eq!(
            sudo_wrap("shutdown -h now", Some("s3cret")),
            "printf %s 's3cret' | sudo -S -p '' shutdown -h now"
        );
    }

    #[test]
    fn sudo_without_password_is_non_interactive() {
        assert_eq!(sudo_wrap("shutdown -r now", None), "sudo -n shutdown -r now");
        assert_eq!(sudo_wrap("shutdown -r now", Some("")), "sudo -n shutdown -r now");
    }

    #[test]
    fn redacted_wrapper_hides_password() {
        let logged = sudo_wrap_redacted("shutdown -h now", Some("s3cret"));
        assert!(!logged.contains("s3cret"));
        assert!(logged.contains("sudo -S -p ''"));
        assert_eq!(
            sudo_wrap_redacted("shutdown -h now", None),
            "sudo -n shutdown -h now"
        );
    }

    #[test]
    fn login_shell_quotes_command() {
        assert_eq!(login_shell("echo hi"), "sh -lc 'echo hi'");
        assert_eq!(
            login_shell("printf %s 'pw' | sudo -S -p '' reboot"),
            r"sh -lc 'printf %s '\''pw'\'' | sudo -S -p '\'''\'' reboot'"
        );
    }

    #[test]
    fn tcl_quote_escapes_substitutions() {
        assert_eq!(tcl_quote("a b"), r#""a b""#);
        assert_eq!(tcl_quote(r#"$x [y] "z" \w"#), r#""\$x \[y\] \"z\" \\w""#);
    }

    #[test]
    fn script_answers_prompts_and_propagates_status() {
        let spawn = vec![
            "ssh".to_string(),
            "-tt".to_string(),
            "admin@nas".to_string(),
            "sh -lc 'echo hi'".to_string(),
        ];
        let script = expect_script(&spawn, "pa$$", Duration::from_secs(30));

        assert!(script.starts_with("set timeout 30\n"));
        assert!(script.contains(r#"spawn -noecho "ssh" "-tt" "admin@nas" "sh -lc 'echo hi'""#));
        assert!(script.contains(r#"send -- "pa\$\$\r""#));
        assert!(script.contains("-re {(?i)password:}"));
        assert!(script.contains("{ exit 255 }"));
        assert!(script.contains("timeout { exit 124 }"));
        assert!(script.trim_end().ends_with("exit $value"));
    }
}
