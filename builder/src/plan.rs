use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde_json::{json, Value};
use tokio::process::Command;
use tracing::instrument;

use crate::error::{Error, Result};

pub const NIXPACKS_BINARY_PATH: &str = "/usr/local/bin/nixpacks";
pub const RAILPACK_BINARY_PATH: &str = "/usr/local/bin/railpack";

const CADDYFILE_BASE_STATIC: &str = "# this file is read-only\n:{$PORT:80} {\n\troot * {$PUBLIC_ROOT:/var/www/html}\n\tfile_server{CUSTOM}\n}\n";

const CADDYFILE_CUSTOM_NOT_FOUND: &str = "\n\n\thandle_errors {\n\t\t@404 {\n\t\t\texpression {http.error.status_code} == 404\n\t\t}\n\t\trewrite @404 {PAGE}\n\t\tfile_server\n\t}";

const CADDYFILE_CUSTOM_INDEX: &str = "\n\n\ttry_files {path} {PAGE}";

const DOCKERFILE_STATIC: &str = "\n# Webapp based on caddy\nFROM caddy:alpine\n\nWORKDIR /var/www/html\n\nENV PUBLIC_ROOT=/var/www/html\n\nCOPY ./{PUBLISH_DIR}/ /var/www/html/\nCOPY ./Caddyfile /etc/caddy/Caddyfile\n";

const DOCKERFILE_NIXPACKS_STATIC: &str = "\n# Webapp based on caddy\nFROM caddy:alpine AS production\n\nWORKDIR /var/www/html\n\nENV PUBLIC_ROOT=/var/www/html\n\nCOPY --from=builder {PUBLISH_DIR} /var/www/html/\nCOPY ./Caddyfile /etc/caddy/Caddyfile\n";

#[derive(Debug, Clone)]
pub struct DockerfilePlan {
    pub dockerfile_path: PathBuf,
    pub build_context: PathBuf,
}

#[derive(Debug, Clone)]
pub struct StaticDirPlan {
    pub dockerfile_path: PathBuf,
    pub build_context: PathBuf,
    pub caddyfile_contents: String,
}

#[derive(Debug, Clone)]
pub struct NixpacksPlan {
    pub dockerfile_path: PathBuf,
    pub build_context: PathBuf,
    pub plan_json: Value,
    pub caddyfile_contents: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RailpackPlan {
    pub config_path: PathBuf,
    pub plan_json: Value,
}

/// Caddy text served from the repo's publish directory, honouring an
/// in-repo `Caddyfile` override when present.
pub fn generate_static_caddyfile(is_spa: bool, index_page: Option<&str>, not_found_page: Option<&str>) -> String {
    let custom = if is_spa {
        index_page.map(|page| CADDYFILE_CUSTOM_INDEX.replace("{PAGE}", page)).unwrap_or_default()
    } else {
        not_found_page.map(|page| CADDYFILE_CUSTOM_NOT_FOUND.replace("{PAGE}", page)).unwrap_or_default()
    };
    CADDYFILE_BASE_STATIC.replace("{CUSTOM}", &custom)
}

pub fn generate_static_dockerfile(publish_directory: &str) -> String {
    DOCKERFILE_STATIC.replace("{PUBLISH_DIR}", publish_directory)
}

pub fn generate_nixpacks_static_dockerfile(publish_directory: &str) -> String {
    DOCKERFILE_NIXPACKS_STATIC.replace("{PUBLISH_DIR}", publish_directory)
}

/// `.env` file content written into the build context for Dockerfile builds,
/// so a plain `docker build` picks up resolved build-time variables even
/// without `--build-arg` plumbing.
pub fn build_context_env_file(variables: &BTreeMap<String, String>) -> String {
    variables.iter().map(|(key, value)| format!("{key}={value}\n")).collect()
}

/// Dockerfile builder: user supplies the path and context, we only drop the
/// resolved `.env` file alongside it.
#[instrument(skip(variables))]
pub async fn plan_dockerfile_builder(
    build_root: &Path,
    dockerfile_path: &str,
    build_context: &str,
    variables: &BTreeMap<String, String>,
) -> Result<DockerfilePlan> {
    let context_dir = build_root.join(build_context);
    tokio::fs::write(context_dir.join(".env"), build_context_env_file(variables)).await?;

    Ok(DockerfilePlan {
        dockerfile_path: build_root.join(dockerfile_path),
        build_context: context_dir,
    })
}

#[instrument(skip(not_found_page, index_page))]
pub async fn plan_static_dir_builder(
    build_root: &Path,
    publish_directory: &str,
    is_spa: bool,
    index_page: Option<&str>,
    not_found_page: Option<&str>,
) -> Result<StaticDirPlan> {
    let custom_caddyfile = build_root.join(publish_directory).join("Caddyfile");
    let caddyfile_contents = if tokio::fs::try_exists(&custom_caddyfile).await.unwrap_or(false) {
        tokio::fs::read_to_string(&custom_caddyfile).await?
    } else {
        generate_static_caddyfile(is_spa, index_page, not_found_page)
    };

    let caddyfile_path = build_root.join("Caddyfile");
    tokio::fs::write(&caddyfile_path, &caddyfile_contents).await?;

    let dockerfile_path = build_root.join("Dockerfile");
    tokio::fs::write(&dockerfile_path, generate_static_dockerfile(publish_directory)).await?;

    Ok(StaticDirPlan {
        dockerfile_path,
        build_context: build_root.to_path_buf(),
        caddyfile_contents,
    })
}

/// Runs the nixpacks planner against the build directory, producing
/// `.nixpacks/plan.json` and a generated Dockerfile. In static mode, appends
/// a second stage copying the build output into a Caddy image.
#[instrument(skip(variables))]
pub async fn plan_nixpacks_builder(
    build_root: &Path,
    variables: &BTreeMap<String, String>,
    is_static: bool,
    publish_directory: Option<&str>,
) -> Result<NixpacksPlan> {
    let nixpacks_dir = build_root.join(".nixpacks");
    tokio::fs::create_dir_all(&nixpacks_dir).await?;
    let plan_path = nixpacks_dir.join("plan.json");

    let mut args = vec!["plan".to_string()];
    args.push("--format".to_string());
    args.push("json".to_string());
    for (key, value) in variables {
        args.push("--env".to_string());
        args.push(format!("{key}={value}"));
    }
    args.push(build_root.display().to_string());

    let output = Command::new(NIXPACKS_BINARY_PATH)
        .args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|err| Error::BuildFailed(err.to_string()))?;

    if !output.status.success() {
        return Err(Error::BuildFailed("nixpacks plan generation failed".to_string()));
    }

    tokio::fs::write(&plan_path, &output.stdout).await?;
    let plan_json: Value =
        serde_json::from_slice(&output.stdout).map_err(|err| Error::Malformed(err.to_string()))?;

    let build_status = Command::new(NIXPACKS_BINARY_PATH)
        .args(["build", "--plan"])
        .arg(&plan_path)
        .arg(build_root)
        .status()
        .await
        .map_err(|err| Error::BuildFailed(err.to_string()))?;
    if !build_status.success() {
        return Err(Error::BuildFailed("nixpacks dockerfile generation failed".to_string()));
    }

    let dockerfile_path = nixpacks_dir.join("Dockerfile");
    let caddyfile_contents = if is_static {
        let publish_directory = publish_directory.ok_or_else(|| Error::Malformed("static nixpacks build requires a publish directory".to_string()))?;
        let contents = generate_static_caddyfile(false, None, None);
        tokio::fs::write(build_root.join("Caddyfile"), &contents).await?;
        let combined = generate_nixpacks_static_dockerfile(publish_directory);
        tokio::fs::write(&dockerfile_path, combined).await?;
        Some(contents)
    } else {
        None
    };

    Ok(NixpacksPlan {
        dockerfile_path,
        build_context: build_root.to_path_buf(),
        plan_json,
        caddyfile_contents,
    })
}

/// Railpack config is a plain JSON document; in static mode we splice in a
/// `caddy` step whose asset is the Caddyfile and whose deploy variables
/// point `PUBLIC_ROOT` at the publish directory.
pub fn build_static_railpack_config(base: Value, publish_directory: &str, caddyfile_contents: &str) -> Value {
    let mut config = base;
    config["steps"]["packages:caddy"] = json!({
        "inputs": [{"image": "ghcr.io/railwayapp/railpack-builder:latest"}],
        "commands": [
            {"cmd": "mise install-into caddy@2.9.1 /railpack/caddy"},
            {"path": "/railpack/caddy"},
            {"path": "/railpack/caddy/bin"},
        ],
        "deployOutputs": [{"include": ["/railpack/caddy"]}],
        "secrets": [],
    });
    config["steps"]["caddy"] = json!({
        "inputs": [{"step": "packages:caddy"}],
        "commands": [
            {"path": "/Caddyfile", "name": "Caddyfile"},
            {"cmd": "caddy fmt --overwrite /Caddyfile"},
        ],
        "assets": {"Caddyfile": caddyfile_contents},
        "deployOutputs": [{"include": ["/Caddyfile"]}],
        "secrets": [],
    });
    config["steps"]["build:export"] = json!({
        "inputs": [{"step": "build"}],
        "deployOutputs": [{"include": [publish_directory]}],
        "secrets": [],
    });
    config["deploy"] = json!({
        "startCommand": "caddy run --config /Caddyfile --adapter caddyfile 2>&1",
        "variables": {"PUBLIC_ROOT": publish_directory},
    });
    config
}

#[instrument(skip(variables))]
pub async fn plan_railpack_builder(
    build_root: &Path,
    variables: &BTreeMap<String, String>,
    is_static: bool,
    publish_directory: Option<&str>,
) -> Result<RailpackPlan> {
    let railpack_dir = build_root.join(".railpack");
    tokio::fs::create_dir_all(&railpack_dir).await?;
    let plan_path = railpack_dir.join("plan.json");
    let config_path = build_root.join("railpack.json");

    let mut config = json!({"$schema": "https://schema.railpack.com"});
    if is_static {
        let publish_directory = publish_directory.ok_or_else(|| Error::Malformed("static railpack build requires a publish directory".to_string()))?;
        let caddyfile_contents = generate_static_caddyfile(false, None, None);
        config = build_static_railpack_config(config, publish_directory, &caddyfile_contents);
    }
    tokio::fs::write(&config_path, serde_json::to_vec(&config).map_err(|err| Error::Malformed(err.to_string()))?).await?;

    let mut args = vec!["prepare".to_string()];
    for (key, value) in variables {
        args.push("--env".to_string());
        args.push(format!("{key}={value}"));
    }
    args.push("--env".to_string());
    args.push("FORCE_COLOR=true".to_string());
    args.push("--config-file".to_string());
    args.push("railpack.json".to_string());
    args.push("--plan-out".to_string());
    args.push(plan_path.display().to_string());
    args.push(build_root.display().to_string());

    let status = Command::new(RAILPACK_BINARY_PATH)
        .args(&args)
        .current_dir(build_root)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .status()
        .await
        .map_err(|err| Error::BuildFailed(err.to_string()))?;
    if !status.success() {
        return Err(Error::BuildFailed("railpack plan generation failed".to_string()));
    }

    let plan_json: Value = serde_json::from_slice(&tokio::fs::read(&plan_path).await?).map_err(|err| Error::Malformed(err.to_string()))?;

    Ok(RailpackPlan { config_path, plan_json })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_caddyfile_spa_mode_rewrites_to_index() {
        let caddyfile = generate_static_caddyfile(true, Some("/index.html"), None);
        assert!(caddyfile.contains("try_files {path} /index.html"));
    }

    #[test]
    fn static_caddyfile_non_spa_honours_custom_404() {
        let caddyfile = generate_static_caddyfile(false, None, Some("/404.html"));
        assert!(caddyfile.contains("rewrite @404 /404.html"));
    }

    #[test]
    fn static_dockerfile_embeds_publish_directory() {
        let dockerfile = generate_static_dockerfile("dist");
        assert!(dockerfile.contains("COPY ./dist/ /var/www/html/"));
    }

    #[test]
    fn env_file_formats_each_variable_on_its_own_line() {
        let mut vars = BTreeMap::new();
        vars.insert("NODE_ENV".to_string(), "production".to_string());
        let contents = build_context_env_file(&vars);
        assert_eq!(contents, "NODE_ENV=production\n");
    }

    #[test]
    fn static_railpack_config_sets_public_root_variable() {
        let config = build_static_railpack_config(json!({"$schema": "x"}), "dist", "caddy contents");
        assert_eq!(config["deploy"]["variables"]["PUBLIC_ROOT"], "dist");
    }
}
