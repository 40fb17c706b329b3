//! Per-session command wrappers.
//!
//! A wrapper directory is prepended to the agent's PATH. Each wrapped
//! command is a thin script that asks the session daemon about its
//! targets and then execs the real binary with the original argv
//! untouched. The helper fails closed: if the daemon socket is down,
//! destructive commands do not run.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;
use tracing::debug;

use crate::config::constants::{WRAPPER_DIR_PREFIX, env, limits};
use crate::policy::model::Action;

/// Commands wrapped for each policy action.
fn commands_for(action: Action) -> &'static [&'static str] {
    match action {
        Action::Delete => &["rm", "unlink", "rmdir"],
        Action::Modify => &["mv", "cp", "touch", "chmod", "chown", "tee"],
        Action::Execute => &["npm", "npx", "yarn", "pnpm", "pip", "pip3", "cargo", "gem", "brew"],
        Action::Read => &["cat", "less", "more", "head", "tail"],
    }
}

/// The daemon action a wrapped command's targets are checked under.
fn daemon_action(action: Action) -> &'static str {
    match action {
        Action::Delete => "delete",
        Action::Modify => "modify",
        Action::Execute => "execute",
        Action::Read => "read",
    }
}

fn helper_script() -> String {
    format!(
        r#"#!/usr/bin/env bash
# Asks the session daemon about each target; exits 1 on any deny.
# A dead socket is a deny: destructive commands fail closed.
PORT="${{{port_var}:?veto daemon port not set}}"
MODE="$1"; shift

json_escape() {{
    printf '%s' "$1" | sed 's/\\/\\\\/g; s/"/\\"/g'
}}

ask_daemon() {{
    local payload="$1"
    local response
    response=$(printf '%s\n' "$payload" | {{
        exec 3<>"/dev/tcp/127.0.0.1/$PORT" || exit 1
        cat >&3
        head -n 1 <&3
    }} 2>/dev/null)
    if [ -z "$response" ]; then
        echo "veto: daemon unreachable, refusing" >&2
        return 1
    fi
    case "$response" in
        *'"allowed":true'*) return 0 ;;
    esac
    local reason
    reason=$(printf '%s' "$response" | sed -n 's/.*"reason":"\([^"]*\)".*/\1/p')
    echo "veto: blocked${{reason:+: $reason}}" >&2
    local suggest
    suggest=$(printf '%s' "$response" | sed -n 's/.*"suggest":"\([^"]*\)".*/\1/p')
    [ -n "$suggest" ] && echo "veto: try: $suggest" >&2
    return 1
}}

ask_target() {{
    local action="$1" target="$2"
    ask_daemon "{{\"action\":\"$action\",\"target\":\"$(json_escape "$target")\"}}"
}}

if [ "$MODE" = "--command" ]; then
    command_text="$1"
    ask_daemon "{{\"action\":\"execute\",\"target\":\"\",\"command\":\"$(json_escape "$command_text")\"}}" || exit 1
    exit 0
fi

ACTION="$MODE"
checked=0
for target in "$@"; do
    case "$target" in
        -*) continue ;;
    esac
    if [ -d "$target" ]; then
        while IFS= read -r file; do
            [ -z "$file" ] && continue
            ask_target "$ACTION" "$file" || exit 1
            checked=$((checked + 1))
            [ "$checked" -ge {max_files} ] && break
        done <<EOF
$(find "$target" -maxdepth {max_depth} -type f 2>/dev/null | head -n {max_files})
EOF
    else
        ask_target "$ACTION" "$target" || exit 1
    fi
done
exit 0
"#,
        port_var = env::PORT,
        max_depth = limits::SHIM_MAX_DEPTH,
        max_files = limits::SHIM_MAX_FILES,
    )
}

fn command_wrapper(command: &str, action: &str) -> String {
    format!(
        r#"#!/usr/bin/env bash
# veto wrapper: gate {command}, then exec the real binary untouched.
WRAPPER_DIR="$(cd "$(dirname "$0")" && pwd)"
"$WRAPPER_DIR/veto-ask" {action} "$@" || exit 1
REAL=""
OLD_IFS="$IFS"
IFS=:
for dir in $PATH; do
    [ "$dir" = "$WRAPPER_DIR" ] && continue
    if [ -x "$dir/{command}" ]; then
        REAL="$dir/{command}"
        break
    fi
done
IFS="$OLD_IFS"
if [ -z "$REAL" ]; then
    echo "veto: real {command} not found on PATH" >&2
    exit 127
fi
exec "$REAL" "$@"
"#
    )
}

fn git_wrapper() -> String {
    r#"#!/usr/bin/env bash
# veto wrapper for git: destructive subcommands go through the daemon.
WRAPPER_DIR="$(cd "$(dirname "$0")" && pwd)"

case "$1" in
    rm)
        shift
        "$WRAPPER_DIR/veto-ask" delete "$@" || exit 1
        set -- rm "$@"
        ;;
    clean|checkout|reset)
        "$WRAPPER_DIR/veto-ask" --command "git $*" || exit 1
        ;;
esac

REAL=""
OLD_IFS="$IFS"
IFS=:
for dir in $PATH; do
    [ "$dir" = "$WRAPPER_DIR" ] && continue
    if [ -x "$dir/git" ]; then
        REAL="$dir/git"
        break
    fi
done
IFS="$OLD_IFS"
if [ -z "$REAL" ]; then
    echo "veto: real git not found on PATH" >&2
    exit 127
fi
exec "$REAL" "$@"
"#
    .to_string()
}

fn powershell_wrapper(command: &str, action: &str) -> String {
    format!(
        r#"# veto wrapper: gate {command} through the session daemon.
$wrapperDir = Split-Path -Parent $MyInvocation.MyCommand.Path
& bash "$wrapperDir/veto-ask" {action} @args
if ($LASTEXITCODE -ne 0) {{ exit 1 }}
$real = (Get-Command {command} -All | Where-Object {{ $_.Source -notlike "$wrapperDir*" }} | Select-Object -First 1).Source
if (-not $real) {{ exit 127 }}
& $real @args
exit $LASTEXITCODE
"#
    )
}

fn cmd_stub(command: &str) -> String {
    format!(
        "@echo off\r\npowershell -NoProfile -ExecutionPolicy Bypass -File \"%~dp0{command}.ps1\" %*\r\nexit /b %ERRORLEVEL%\r\n"
    )
}

fn write_executable(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content).with_context(|| format!("failed to write {:?}", path))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
            .with_context(|| format!("failed to mark {:?} executable", path))?;
    }
    Ok(())
}

/// A live wrapper directory. Dropping it removes the scripts.
pub struct ShimLayer {
    dir: TempDir,
    wrapped: Vec<String>,
}

impl ShimLayer {
    /// Write the helper plus wrappers for every command the session's
    /// policy actions cover. The `git` wrapper is added whenever delete
    /// or execute is gated.
    pub fn create(actions: &[Action]) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(WRAPPER_DIR_PREFIX)
            .tempdir()
            .context("failed to create wrapper directory")?;

        write_executable(&dir.path().join("veto-ask"), &helper_script())?;

        let mut wrapped = Vec::new();
        for action in actions {
            for command in commands_for(*action) {
                let script_path = dir.path().join(command);
                write_executable(&script_path, &command_wrapper(command, daemon_action(*action)))?;
                if cfg!(windows) {
                    write_executable(
                        &dir.path().join(format!("{command}.ps1")),
                        &powershell_wrapper(command, daemon_action(*action)),
                    )?;
                    write_executable(&dir.path().join(format!("{command}.cmd")), &cmd_stub(command))?;
                }
                wrapped.push(command.to_string());
            }
        }

        if actions.contains(&Action::Delete) || actions.contains(&Action::Execute) {
            write_executable(&dir.path().join("git"), &git_wrapper())?;
            wrapped.push("git".to_string());
        }

        debug!(dir = ?dir.path(), commands = wrapped.len(), "wrapper directory ready");
        Ok(Self { dir, wrapped })
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn wrapped_commands(&self) -> &[String] {
        &self.wrapped
    }

    /// PATH value with the wrapper directory prepended.
    pub fn prepended_path(&self) -> String {
        let current = std::env::var("PATH").unwrap_or_default();
        let separator = if cfg!(windows) { ';' } else { ':' };
        format!("{}{}{}", self.dir.path().display(), separator, current)
    }

    /// Environment for the wrapped agent subprocess.
    pub fn child_env(&self, port: u16, session_id: &str) -> Vec<(String, String)> {
        vec![
            ("PATH".to_string(), self.prepended_path()),
            (env::PORT.to_string(), port.to_string()),
            (env::ACTIVE.to_string(), "1".to_string()),
            (env::SESSION_ID.to_string(), session_id.to_string()),
        ]
    }

    /// Remove the wrapper directory now instead of at drop.
    pub fn teardown(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir
            .close()
            .with_context(|| format!("failed to remove wrapper dir {:?}", path))
    }
}
