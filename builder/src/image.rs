use std::collections::BTreeMap;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::instrument;

use crate::buildkit::DOCKER_BINARY_PATH;
use crate::error::{Error, Result};

const MAX_LOG_LINE_CHARS: usize = 1000;

#[derive(Debug, Clone)]
pub struct BuildArgs {
    pub dockerfile_path: std::path::PathBuf,
    pub build_context: std::path::PathBuf,
    pub image_tag: String,
    pub build_args: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub no_cache: bool,
    pub target_stage: Option<String>,
    pub builder_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BuildLogLine {
    /// Truncated to [`MAX_LOG_LINE_CHARS`], ANSI escapes preserved.
    pub raw: String,
    /// The same line with ANSI escapes stripped, for search indexing.
    pub stripped: String,
}

/// Strips `ESC [ ... letter` CSI sequences without pulling in a regex crate.
pub fn strip_ansi(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' && chars.peek() == Some(&'[') {
            chars.next();
            for next in chars.by_ref() {
                if next.is_ascii_alphabetic() {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn truncate_line(line: &str) -> String {
    if line.chars().count() <= MAX_LOG_LINE_CHARS {
        line.to_string()
    } else {
        line.chars().take(MAX_LOG_LINE_CHARS).collect()
    }
}

/// Looks for `^Successfully built <id>` or a bare `sha256:<id>` marker in a
/// stripped build log line and returns the image id if found.
pub fn extract_image_id(stripped_line: &str) -> Option<String> {
    if let Some(rest) = stripped_line.strip_prefix("Successfully built ") {
        let id: String = rest.trim().chars().take_while(|c| c.is_ascii_hexdigit()).collect();
        if !id.is_empty() {
            return Some(id);
        }
    }
    if let Some(index) = stripped_line.find("sha256:") {
        let rest = &stripped_line[index + "sha256:".len()..];
        let id: String = rest.chars().take_while(|c| c.is_ascii_hexdigit()).collect();
        if !id.is_empty() {
            return Some(id);
        }
    }
    None
}

fn build_command_args(args: &BuildArgs) -> Vec<String> {
    let mut cmd = vec!["buildx".to_string(), "build".to_string()];
    if let Some(builder) = &args.builder_name {
        cmd.push("--builder".to_string());
        cmd.push(builder.clone());
    }
    cmd.push("--load".to_string());
    cmd.push("-t".to_string());
    cmd.push(args.image_tag.clone());
    cmd.push("-f".to_string());
    cmd.push(args.dockerfile_path.display().to_string());
    if args.no_cache {
        cmd.push("--no-cache".to_string());
    }
    if let Some(target) = &args.target_stage {
        cmd.push("--target".to_string());
        cmd.push(target.clone());
    }
    for (key, value) in &args.build_args {
        cmd.push("--build-arg".to_string());
        cmd.push(format!("{key}={value}"));
    }
    for (key, value) in &args.labels {
        cmd.push("--label".to_string());
        cmd.push(format!("{key}={value}"));
    }
    cmd.push(args.build_context.display().to_string());
    cmd
}

/// Runs the container build, streaming stdout/stderr line by line through
/// `on_line`. Recognises the built image id from the output; a non-zero
/// exit or a missing id both surface as [`Error::BuildFailed`].
#[instrument(skip(args, on_line))]
pub async fn build_image<F>(args: BuildArgs, mut on_line: F) -> Result<String>
where
    F: FnMut(BuildLogLine) + Send,
{
    let command_args = build_command_args(&args);

    let mut child = Command::new(DOCKER_BINARY_PATH)
        .args(&command_args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| Error::BuildFailed(err.to_string()))?;

    let stdout = child.stdout.take().expect("piped stdout");
    let stderr = child.stderr.take().expect("piped stderr");
    let mut stdout_lines = BufReader::new(stdout).lines();
    let mut stderr_lines = BufReader::new(stderr).lines();

    let mut image_id: Option<String> = None;

    loop {
        tokio::select! {
            line = stdout_lines.next_line() => {
                match line.map_err(Error::Io)? {
                    Some(line) => {
                        let stripped = strip_ansi(&line);
                        if let Some(id) = extract_image_id(&stripped) {
                            image_id = Some(id);
                        }
                        on_line(BuildLogLine { raw: truncate_line(&line), stripped: truncate_line(&stripped) });
                    }
                    None => break,
                }
            }
            line = stderr_lines.next_line() => {
                if let Some(line) = line.map_err(Error::Io)? {
                    let stripped = strip_ansi(&line);
                    on_line(BuildLogLine { raw: truncate_line(&line), stripped: truncate_line(&stripped) });
                }
            }
        }
    }

    let status = child.wait().await.map_err(|err| Error::BuildFailed(err.to_string()))?;
    if !status.success() {
        return Err(Error::BuildFailed(format!("docker buildx build exited with {}", status.code().unwrap_or(-1))));
    }

    image_id.ok_or_else(|| Error::BuildFailed("build succeeded but no image id was reported".to_string()))
}

pub async fn kill_build(pid: u32) {
    let _ = Command::new("kill").arg("-TERM").arg(pid.to_string()).status().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_image_id_matches_successfully_built_marker() {
        assert_eq!(extract_image_id("Successfully built abc123def"), Some("abc123def".to_string()));
    }

    #[test]
    fn extract_image_id_matches_sha256_marker() {
        assert_eq!(extract_image_id("writing image sha256:deadbeef01 done"), Some("deadbeef01".to_string()));
    }

    #[test]
    fn extract_image_id_returns_none_for_unrelated_lines() {
        assert_eq!(extract_image_id("#12 [3/5] RUN npm install"), None);
    }

    #[test]
    fn strip_ansi_removes_color_codes() {
        assert_eq!(strip_ansi("\u{1b}[32mok\u{1b}[0m"), "ok");
    }

    #[test]
    fn build_command_includes_build_args_and_labels() {
        let args = BuildArgs {
            dockerfile_path: "Dockerfile".into(),
            build_context: ".".into(),
            image_tag: "zane/svc:abc".to_string(),
            build_args: BTreeMap::from([("NODE_ENV".to_string(), "production".to_string())]),
            labels: BTreeMap::from([("zane-managed".to_string(), "true".to_string())]),
            no_cache: true,
            target_stage: Some("production".to_string()),
            builder_name: Some("builder-zane-env_1".to_string()),
        };
        let cmd = build_command_args(&args);
        assert!(cmd.contains(&"--no-cache".to_string()));
        assert!(cmd.contains(&"--build-arg".to_string()));
        assert!(cmd.contains(&"NODE_ENV=production".to_string()));
        assert!(cmd.contains(&"--target".to_string()));
    }
}
