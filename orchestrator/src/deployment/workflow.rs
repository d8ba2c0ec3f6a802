use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::{info, instrument, warn};
use zane_builder::{
    build_image, builder_name_for_environment, clone_and_checkout, ensure_builder, plan_dockerfile_builder,
    plan_nixpacks_builder, plan_railpack_builder, plan_static_dir_builder, BuildArgs, REPOSITORY_CLONE_LOCATION,
};
use zane_common::model::{Builder, DeploymentStatus, Healthcheck, ServiceSource, ServiceSpec, Slot};
use zane_common::{Deployment, DeploymentId, Error as CommonError, ErrorKind, ServiceId};
use zane_docker::{
    AttachedConfigSpec, ContainerDriver, MountSpec, SwarmServiceSpec, LABEL_DEPLOYMENT_HASH, LABEL_MANAGED, LABEL_PARENT_ID,
};
use zane_proxy::{build_deployment_url_route, build_service_url_route, RedirectTarget, ServiceUrlRequest};

use super::cancellation::CancellationSignal;
use super::context::DeploymentContext;
use super::healthcheck::{poll_once, shell_words};
use super::step::DeploymentStep;
use crate::error::{Error, Result};
use crate::semaphore::SemaphoreRegistry;

/// Publish directory assumed for static-mode Nixpacks/Railpack builds, which
/// (unlike the `StaticDir` builder) don't carry an explicit one of their own.
const DEFAULT_STATIC_PUBLISH_DIRECTORY: &str = "dist";

/// Runs a deployment to completion, then looks for the next queued
/// deployment of the same service and continues as that deployment instead
/// of returning, per the tail-call cleanup rule in step 19.
#[instrument(skip(ctx, cancellation), fields(deployment_id = %deployment_id))]
pub async fn run(
    ctx: &DeploymentContext<'_>,
    project_slug: &str,
    deployment_id: DeploymentId,
    cancellation: &CancellationSignal,
) -> Result<Deployment> {
    run_paused(ctx, project_slug, deployment_id, cancellation, None).await
}

/// Same as [`run`], but pauses immediately after reaching `pause_at_step`
/// and waits for a cancellation signal before proceeding. Exists so
/// integration tests can exercise the compensation path deterministically.
pub async fn run_paused(
    ctx: &DeploymentContext<'_>,
    project_slug: &str,
    mut deployment_id: DeploymentId,
    cancellation: &CancellationSignal,
    pause_at_step: Option<DeploymentStep>,
) -> Result<Deployment> {
    loop {
        let finished = run_single(ctx, project_slug, deployment_id, cancellation, pause_at_step).await?;
        match next_queued(ctx, finished.service_id, finished.id).await? {
            Some(next_id) => deployment_id = next_id,
            None => return Ok(finished),
        }
    }
}

/// Marks `deployment_id` for cancellation. Rejects deployments that already
/// reached a terminal state with a fatal `"already finished"` error.
pub async fn request_cancellation(
    ctx: &DeploymentContext<'_>,
    deployment_id: DeploymentId,
    signal: &CancellationSignal,
) -> Result<()> {
    let deployment = ctx.persistence.get_deployment(deployment_id).await?;
    if deployment.is_terminal() {
        return Err(internal(CommonError::fatal("already finished")));
    }
    signal.request();
    Ok(())
}

async fn next_queued(ctx: &DeploymentContext<'_>, service_id: ServiceId, just_finished: DeploymentId) -> Result<Option<DeploymentId>> {
    let queued = ctx.persistence.list_queued_deployments(service_id).await?;
    Ok(queued.into_iter().find(|d| d.id != just_finished).map(|d| d.id))
}

fn internal(err: CommonError) -> Error {
    Error::Common(err)
}

async fn run_single(
    ctx: &DeploymentContext<'_>,
    project_slug: &str,
    deployment_id: DeploymentId,
    cancellation: &CancellationSignal,
    pause_at_step: Option<DeploymentStep>,
) -> Result<Deployment> {
    let deployment = ctx.persistence.get_deployment(deployment_id).await?;
    let service_id = deployment.service_id;
    let permit = ctx.semaphore.acquire(&SemaphoreRegistry::deploy_key(&service_id.to_string())).await;

    // Dropped unconditionally at the end of this scope, even on an early
    // return through `?` — mirrors step 19's unconditional temp-dir cleanup.
    let tmp_dir = tempfile::tempdir().map_err(|err| internal(CommonError::custom(ErrorKind::Internal, err.to_string())))?;

    let result = drive(ctx, project_slug, deployment, cancellation, pause_at_step, tmp_dir.path()).await;
    ctx.semaphore.release(permit);
    result?;

    Ok(ctx.persistence.get_deployment(deployment_id).await?)
}

async fn fail(ctx: &DeploymentContext<'_>, deployment_id: DeploymentId, status: DeploymentStatus, reason: impl Into<String>) -> Result<()> {
    ctx.persistence.update_status(deployment_id, status, Some(&reason.into())).await?;
    ctx.persistence.mark_finished(deployment_id).await?;
    Ok(())
}

#[instrument(skip(ctx, cancellation, tmp_dir), fields(deployment_id = %deployment.id, service_id = %deployment.service_id))]
async fn drive(
    ctx: &DeploymentContext<'_>,
    project_slug: &str,
    deployment: Deployment,
    cancellation: &CancellationSignal,
    pause_at_step: Option<DeploymentStep>,
    tmp_dir: &Path,
) -> Result<()> {
    let deployment_id = deployment.id;
    let service_id = deployment.service_id;
    let snapshot = &deployment.snapshot;

    // Step 2
    ctx.persistence.update_status(deployment_id, DeploymentStatus::Preparing, None).await?;
    ctx.persistence.mark_started(deployment_id).await?;

    // Step 3
    let previous = ctx.persistence.current_production_deployment(service_id).await?;

    let mut last_step = DeploymentStep::Initialized;
    let mut created_volumes: Vec<String> = Vec::new();
    let mut created_configs: Vec<String> = Vec::new();
    let mut previous_scaled_down = false;
    let swarm_service_name = deployment.swarm_service_name(project_slug);

    macro_rules! checkpoint {
        ($step:expr) => {{
            last_step = $step;
            if pause_at_step == Some($step) {
                while !cancellation.is_requested() {
                    sleep(Duration::from_millis(20)).await;
                }
            }
            if cancellation.is_requested() {
                return compensate(
                    ctx,
                    project_slug,
                    &deployment,
                    previous.as_ref(),
                    last_step,
                    &swarm_service_name,
                    &created_configs,
                    &created_volumes,
                    previous_scaled_down,
                )
                .await;
            }
        }};
    }

    // Steps 4-7 (Git only)
    let image_reference = if let ServiceSource::Git {
        repository_url,
        branch,
        commit_sha,
        builder,
    } = &snapshot.source
    {
        checkpoint!(DeploymentStep::Initialized);

        let commit = match clone_and_checkout(tmp_dir, repository_url, branch, commit_sha.as_deref(), ctx.git_token.as_deref()).await {
            Ok(commit) => commit,
            Err(err) => return fail(ctx, deployment_id, DeploymentStatus::Failed, format!("clone_failed: {err}")).await,
        };
        ctx.persistence.record_git_commit(deployment_id, &commit.sha, &commit.message).await?;
        checkpoint!(DeploymentStep::RepositoryCloned);

        let build_root = tmp_dir.join(REPOSITORY_CLONE_LOCATION);
        let environment_id = ctx.environment_id.to_string();
        if let Err(err) = ensure_builder(&environment_id, &ctx.environment_network_name).await {
            return fail(ctx, deployment_id, DeploymentStatus::Failed, format!("build_failed: {err}")).await;
        }

        let plan = match plan_builder_inputs(&build_root, builder, &snapshot.env_vars).await {
            Ok(plan) => plan,
            Err(err) => return fail(ctx, deployment_id, DeploymentStatus::Failed, format!("build_failed: {err}")).await,
        };
        checkpoint!(DeploymentStep::BuildingImage);

        ctx.persistence.mark_build_started(deployment_id).await?;
        let image_tag = image_tag_for(project_slug, &deployment);
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_MANAGED.to_string(), "true".to_string());
        labels.insert(LABEL_PARENT_ID.to_string(), service_id.to_string());
        labels.insert(LABEL_DEPLOYMENT_HASH.to_string(), deployment.hash.clone());

        let build_args = BuildArgs {
            dockerfile_path: plan.dockerfile_path,
            build_context: plan.build_context,
            image_tag: image_tag.clone(),
            build_args: snapshot.env_vars.clone(),
            labels,
            no_cache: false,
            target_stage: None,
            builder_name: Some(builder_name_for_environment(&environment_id)),
        };

        if let Err(err) = build_image(build_args, |line| {
            ctx.log_recorder.record(zane_common::log::LogEvent {
                deployment_id: Some(deployment_id.to_string()),
                service_id: Some(service_id.to_string()),
                level: zane_common::log::Level::Info,
                source: "build".to_string(),
                message: line.raw,
                timestamp: chrono::Utc::now(),
            });
        })
        .await
        {
            return fail(ctx, deployment_id, DeploymentStatus::Failed, format!("build_failed: {err}")).await;
        }
        ctx.persistence.mark_build_finished(deployment_id, &image_tag).await?;
        checkpoint!(DeploymentStep::ImageBuilt);

        image_tag
    } else {
        String::new()
    };

    // Step 8: volumes
    ctx.persistence.update_status(deployment_id, DeploymentStatus::Building, None).await?;
    for volume in &snapshot.volumes {
        if volume.host_path.is_none() {
            let name = volume_name(project_slug, service_id, &volume.name);
            if let Err(err) = ctx.driver.ensure_volume(&name).await {
                return fail(ctx, deployment_id, DeploymentStatus::Failed, format!("volume creation failed: {err}")).await;
            }
            created_volumes.push(name);
        }
    }
    checkpoint!(DeploymentStep::VolumesCreated);

    // Step 9: configs
    for config in &snapshot.configs {
        match ctx.driver.create_config(&config_name(project_slug, service_id, &config.name), config.contents.as_bytes()).await {
            Ok(id) => created_configs.push(id),
            Err(err) => return fail(ctx, deployment_id, DeploymentStatus::Failed, format!("config creation failed: {err}")).await,
        }
    }
    checkpoint!(DeploymentStep::ConfigsCreated);

    // Step 10: scale down previous if strictly necessary
    if let Some(previous) = &previous {
        if snapshot.has_rw_volumes_or_host_ports() && previous.status == DeploymentStatus::Healthy {
            if let Err(err) = ctx.driver.scale_service(&previous.swarm_service_name(project_slug), 0).await {
                return fail(ctx, deployment_id, DeploymentStatus::Failed, format!("previous deployment scale-down failed: {err}")).await;
            }
            previous_scaled_down = true;
        }
    }
    checkpoint!(DeploymentStep::PreviousDeploymentScaledDown);

    // Step 11: pull image (Docker-image sources only)
    let image = if let ServiceSource::DockerImage { image, credentials } = &snapshot.source {
        let (username, password) = credentials
            .as_ref()
            .map(|c| (Some(c.username.as_str()), Some(c.password.as_str())))
            .unwrap_or((None, None));
        if let Err(err) = ctx.driver.pull_image(image, username, password).await {
            return fail(ctx, deployment_id, DeploymentStatus::Failed, format!("image pull failed: {err}")).await;
        }
        image.clone()
    } else {
        image_reference
    };

    // Step 12: create the swarm service
    let spec = build_swarm_service_spec(project_slug, &ctx.environment_network_name, &deployment, snapshot, &image, &created_configs);
    if let Err(err) = ctx.driver.create_service(spec).await {
        return fail(ctx, deployment_id, DeploymentStatus::Failed, format!("swarm service creation failed: {err}")).await;
    }
    checkpoint!(DeploymentStep::SwarmServiceCreated);
    ctx.persistence.mark_swarm_service_created(deployment_id).await?;

    // Step 13: per-deployment proxy route, gated on the service declaring any URL
    if !snapshot.urls.is_empty() {
        if let Some(port) = snapshot.ports.iter().find(|p| p.is_http_only()) {
            let domain = deployment_preview_domain(ctx, &deployment);
            let route = build_deployment_url_route(
                &deployment.hash,
                &domain,
                &swarm_service_name,
                port.forwarded_port,
                &ctx.frontend_internal_hostname,
            );
            if let Err(err) = ctx.proxy.insert_if_absent(&zane_proxy::deployment_url_route_id(&deployment.hash, &domain), route).await {
                return fail(ctx, deployment_id, DeploymentStatus::Failed, format!("proxy route creation failed: {err}")).await;
            }
        }
    }
    checkpoint!(DeploymentStep::DeploymentExposedToHttp);

    // Step 14: healthcheck, retried until the configured timeout elapses
    ctx.persistence.update_status(deployment_id, DeploymentStatus::Starting, None).await?;
    let (status, reason) = run_healthcheck_until_timeout(ctx, &swarm_service_name, &deployment.hash, snapshot.healthcheck.as_ref()).await?;

    if status != DeploymentStatus::Healthy {
        if let Err(err) = ctx.driver.scale_service(&swarm_service_name, 0).await {
            warn!(error = %err, "failed to scale down unhealthy deployment during rollback");
        }
        if let Err(err) = ctx.driver.remove_service(&swarm_service_name).await {
            warn!(error = %err, "failed to remove unhealthy deployment's swarm service during rollback");
        }
        if previous_scaled_down {
            if let Some(previous) = &previous {
                if let Err(err) = ctx.driver.scale_service(&previous.swarm_service_name(project_slug), 1).await {
                    warn!(error = %err, "failed to scale previous deployment back up after rollback");
                }
            }
        }
        return fail(ctx, deployment_id, status, reason.unwrap_or_else(|| "healthcheck failed".to_string())).await;
    }

    // Step 15: flip public URLs to the new deployment, the blue/green commit point
    for url in &snapshot.urls {
        let route = build_service_url_route(&ServiceUrlRequest {
            service_id: &service_id.to_string(),
            domain: &url.domain,
            base_path: &url.base_path,
            strip_prefix: url.strip_prefix,
            associated_port: url.associated_port,
            redirect: url.redirect.as_ref().map(|r| RedirectTarget { url: &r.url, permanent: r.permanent }),
            current_deployment_hash: &deployment.hash,
            current_deployment_slot: &deployment.slot.to_string(),
            current_network_alias: &deployment.network_alias,
            blue_hash: (deployment.slot == Slot::Blue).then_some(deployment.hash.as_str()),
            green_hash: (deployment.slot == Slot::Green).then_some(deployment.hash.as_str()),
            basic_auth: None,
        });
        let route_id = zane_proxy::service_url_route_id(&service_id.to_string(), &url.domain, &url.base_path);
        ctx.proxy.upsert_route(&route_id, route).await?;
    }
    if !snapshot.urls.is_empty() {
        let domains: Vec<String> = snapshot.urls.iter().map(|u| u.domain.clone()).collect();
        ctx.persistence.insert_deployment_urls(deployment_id, &domains).await?;
    }
    checkpoint!(DeploymentStep::ServiceExposedToHttp);

    // Step 16: decommission the outgoing production deployment
    if let Some(previous) = &previous {
        cleanup_previous_production(ctx, project_slug, previous, snapshot).await?;
    }

    // Step 17: promote, mark healthy
    ctx.persistence.promote_to_current_production(service_id, deployment_id).await?;
    ctx.persistence.update_status(deployment_id, DeploymentStatus::Healthy, None).await?;
    ctx.persistence.mark_finished(deployment_id).await?;
    checkpoint!(DeploymentStep::Finished);

    info!(deployment_id = %deployment_id, "deployment reached healthy, now current production");
    Ok(())
}

struct BuildPlanOutput {
    dockerfile_path: PathBuf,
    build_context: PathBuf,
}

async fn plan_builder_inputs(build_root: &Path, builder: &Builder, variables: &BTreeMap<String, String>) -> zane_builder::Result<BuildPlanOutput> {
    match builder {
        Builder::Dockerfile { dockerfile_path, build_context } => {
            let plan = plan_dockerfile_builder(build_root, dockerfile_path, build_context, variables).await?;
            Ok(BuildPlanOutput { dockerfile_path: plan.dockerfile_path, build_context: plan.build_context })
        }
        Builder::StaticDir { publish_directory, is_spa, index_page, not_found_page } => {
            let plan =
                plan_static_dir_builder(build_root, publish_directory, *is_spa, Some(index_page.as_str()), not_found_page.as_deref()).await?;
            Ok(BuildPlanOutput { dockerfile_path: plan.dockerfile_path, build_context: plan.build_context })
        }
        Builder::Nixpacks { is_static } => {
            let publish_directory = is_static.then_some(DEFAULT_STATIC_PUBLISH_DIRECTORY);
            let plan = plan_nixpacks_builder(build_root, variables, *is_static, publish_directory).await?;
            Ok(BuildPlanOutput { dockerfile_path: plan.dockerfile_path, build_context: plan.build_context })
        }
        Builder::Railpack { is_static } => {
            let publish_directory = is_static.then_some(DEFAULT_STATIC_PUBLISH_DIRECTORY);
            // Railpack emits a JSON plan rather than a Dockerfile; the control
            // plane has no dedicated `railpack build` invocation yet, so we
            // hand its config straight to the same buildx call the other
            // builders use. Tracked as an open item in DESIGN.md.
            let plan = plan_railpack_builder(build_root, variables, *is_static, publish_directory).await?;
            Ok(BuildPlanOutput { dockerfile_path: plan.config_path, build_context: build_root.to_path_buf() })
        }
    }
}

fn image_tag_for(project_slug: &str, deployment: &Deployment) -> String {
    format!("zane/{project_slug}/{}:{}", deployment.service_id, deployment.hash)
}

/// Swarm volume name for a service's named volume. Shared with the archiver,
/// which tears down the same volumes this workflow creates.
pub(crate) fn volume_name(project_slug: &str, service_id: ServiceId, volume_name: &str) -> String {
    format!("{project_slug}-{service_id}-{volume_name}")
}

/// Swarm config name for a service's config. Shared with the archiver.
pub(crate) fn config_name(project_slug: &str, service_id: ServiceId, config_name: &str) -> String {
    format!("{project_slug}-{service_id}-{config_name}")
}

fn deployment_preview_domain(ctx: &DeploymentContext<'_>, deployment: &Deployment) -> String {
    format!("{}.{}", deployment.hash, ctx.root_domain)
}

fn build_swarm_service_spec(
    project_slug: &str,
    environment_network_name: &str,
    deployment: &Deployment,
    snapshot: &ServiceSpec,
    image: &str,
    created_config_ids: &[String],
) -> SwarmServiceSpec {
    let mut labels = labels_map(&[
        (LABEL_MANAGED, "true"),
        (LABEL_PARENT_ID, &deployment.service_id.to_string()),
        (LABEL_DEPLOYMENT_HASH, &deployment.hash),
    ]);
    labels.insert("service_type".to_string(), "managed_service".to_string());

    let mounts: Vec<MountSpec> = snapshot
        .volumes
        .iter()
        .map(|v| MountSpec {
            source: v.host_path.clone().unwrap_or_else(|| volume_name(project_slug, deployment.service_id, &v.name)),
            target: v.container_path.clone(),
            read_only: v.mode.is_read_only(),
        })
        .collect();

    let configs: Vec<AttachedConfigSpec> = snapshot
        .configs
        .iter()
        .zip(created_config_ids.iter())
        .map(|(config, id)| AttachedConfigSpec {
            config_id: id.clone(),
            config_name: config_name(project_slug, deployment.service_id, &config.name),
            target_path: config.mount_path.clone(),
        })
        .collect();

    let env: Vec<String> = snapshot.env_vars.iter().map(|(k, v)| format!("{k}={v}")).collect();
    let command = snapshot.command.as_deref().map(shell_words);
    let published_ports: Vec<(u16, u16)> = snapshot.ports.iter().filter_map(|p| p.host_port.map(|host| (host, p.forwarded_port))).collect();

    SwarmServiceSpec {
        name: deployment.swarm_service_name(project_slug),
        image: image.to_string(),
        labels,
        network_name: environment_network_name.to_string(),
        network_aliases: vec![snapshot.network_alias.clone(), deployment.network_alias.clone()],
        env,
        command,
        mounts,
        configs,
        published_ports,
        cpus: snapshot.resource_limits.as_ref().and_then(|r| r.cpus),
        memory_bytes: snapshot.resource_limits.as_ref().and_then(|r| r.memory_mb).map(|mb| (mb * 1024 * 1024) as i64),
        replicas: 1,
    }
}

fn labels_map(pairs: &[(&str, &str)]) -> std::collections::HashMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

async fn run_healthcheck_until_timeout(
    ctx: &DeploymentContext<'_>,
    service_name: &str,
    deployment_hash: &str,
    healthcheck: Option<&Healthcheck>,
) -> Result<(DeploymentStatus, Option<String>)> {
    let timeout = Duration::from_secs(healthcheck.map(|h| h.timeout_seconds).unwrap_or(Healthcheck::DEFAULT_TIMEOUT_SECONDS) as u64);
    let started = Instant::now();
    loop {
        let (status, reason) = poll_once(ctx.driver, service_name, deployment_hash, healthcheck, &ctx.http_client).await?;
        if status == DeploymentStatus::Healthy || started.elapsed() >= timeout {
            return Ok((status, reason));
        }
        sleep(Duration::from_millis(500)).await;
    }
}

async fn cleanup_previous_production(ctx: &DeploymentContext<'_>, project_slug: &str, previous: &Deployment, new_snapshot: &ServiceSpec) -> Result<()> {
    let name = previous.swarm_service_name(project_slug);
    ctx.driver.scale_service(&name, 0).await?;
    ctx.driver.remove_service(&name).await?;

    let still_referenced_volumes: Vec<&str> = new_snapshot.volumes.iter().map(|v| v.name.as_str()).collect();
    for volume in &previous.snapshot.volumes {
        if volume.host_path.is_none() && !still_referenced_volumes.contains(&volume.name.as_str()) {
            ctx.driver.remove_volume(&volume_name(project_slug, previous.service_id, &volume.name)).await?;
        }
    }

    let still_referenced_configs: Vec<&str> = new_snapshot.configs.iter().map(|c| c.name.as_str()).collect();
    for config in &previous.snapshot.configs {
        if !still_referenced_configs.contains(&config.name.as_str()) {
            ctx.driver.remove_config(&config_name(project_slug, previous.service_id, &config.name)).await?;
        }
    }

    let new_domains: Vec<(String, String)> = new_snapshot.urls.iter().map(|u| u.identity_key()).collect();
    for url in &previous.snapshot.urls {
        if !new_domains.contains(&url.identity_key()) {
            let route_id = zane_proxy::service_url_route_id(&previous.service_id.to_string(), &url.domain, &url.base_path);
            ctx.proxy.delete_route(&route_id).await?;
        }
    }
    let preview_domain = deployment_preview_domain(ctx, previous);
    ctx.proxy.delete_route(&zane_proxy::deployment_url_route_id(&previous.hash, &preview_domain)).await?;

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn compensate(
    ctx: &DeploymentContext<'_>,
    project_slug: &str,
    deployment: &Deployment,
    previous: Option<&Deployment>,
    last_step: DeploymentStep,
    swarm_service_name: &str,
    created_configs: &[String],
    created_volumes: &[String],
    previous_scaled_down: bool,
) -> Result<()> {
    if last_step >= DeploymentStep::ServiceExposedToHttp {
        if let Some(previous) = previous {
            for url in &previous.snapshot.urls {
                let route = build_service_url_route(&ServiceUrlRequest {
                    service_id: &previous.service_id.to_string(),
                    domain: &url.domain,
                    base_path: &url.base_path,
                    strip_prefix: url.strip_prefix,
                    associated_port: url.associated_port,
                    redirect: url.redirect.as_ref().map(|r| RedirectTarget { url: &r.url, permanent: r.permanent }),
                    current_deployment_hash: &previous.hash,
                    current_deployment_slot: &previous.slot.to_string(),
                    current_network_alias: &previous.network_alias,
                    blue_hash: (previous.slot == Slot::Blue).then_some(previous.hash.as_str()),
                    green_hash: (previous.slot == Slot::Green).then_some(previous.hash.as_str()),
                    basic_auth: None,
                });
                let route_id = zane_proxy::service_url_route_id(&previous.service_id.to_string(), &url.domain, &url.base_path);
                ctx.proxy.upsert_route(&route_id, route).await?;
            }
        }
    }

    if last_step >= DeploymentStep::DeploymentExposedToHttp {
        let domain = deployment_preview_domain(ctx, deployment);
        ctx.proxy.delete_route(&zane_proxy::deployment_url_route_id(&deployment.hash, &domain)).await?;
    }

    if last_step >= DeploymentStep::SwarmServiceCreated {
        ctx.driver.scale_service(swarm_service_name, 0).await.ok();
        ctx.driver.remove_service(swarm_service_name).await?;
    }

    if last_step >= DeploymentStep::PreviousDeploymentScaledDown && previous_scaled_down {
        if let Some(previous) = previous {
            ctx.driver.scale_service(&previous.swarm_service_name(project_slug), 1).await.ok();
        }
    }

    if last_step >= DeploymentStep::ConfigsCreated {
        for id in created_configs {
            ctx.driver.remove_config(id).await?;
        }
    }

    if last_step >= DeploymentStep::VolumesCreated {
        for name in created_volumes {
            ctx.driver.remove_volume(name).await?;
        }
    }

    ctx.persistence
        .update_status(deployment.id, DeploymentStatus::Cancelled, Some("Deployment cancelled."))
        .await?;
    ctx.persistence.mark_finished(deployment.id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use zane_common::model::{ResourceLimits, Slot};
    use zane_common::{ChangeId, DeploymentId, ServiceId};

    use super::*;

    fn bare_deployment(slot: Slot) -> Deployment {
        let network_alias = slot.qualify_alias("api");
        Deployment {
            id: DeploymentId::new(),
            service_id: ServiceId::new(),
            hash: "d-abc123".to_string(),
            slot,
            status: DeploymentStatus::Queued,
            status_reason: None,
            queued_at: chrono::Utc::now(),
            started_at: None,
            finished_at: None,
            build_started_at: None,
            build_finished_at: None,
            snapshot: ServiceSpec {
                slug: "api".to_string(),
                network_alias: "api".to_string(),
                source: ServiceSource::DockerImage { image: "nginx:latest".to_string(), credentials: None },
                volumes: vec![],
                configs: vec![],
                env_vars: BTreeMap::new(),
                ports: vec![],
                urls: vec![],
                healthcheck: None,
                resource_limits: Some(ResourceLimits { cpus: Some(0.5), memory_mb: Some(256) }),
                command: None,
            },
            changes: vec![ChangeId::new()],
            is_current_production: false,
            commit_sha: None,
            commit_message: None,
            image_tag: None,
            network_alias,
            reached_swarm_service: false,
        }
    }

    #[test]
    fn image_tag_is_namespaced_by_project_and_hash() {
        let deployment = bare_deployment(Slot::Blue);
        let tag = image_tag_for("acme", &deployment);
        assert!(tag.starts_with("zane/acme/"));
        assert!(tag.ends_with(":d-abc123"));
    }

    #[test]
    fn swarm_service_spec_carries_both_plain_and_slot_qualified_aliases() {
        let deployment = bare_deployment(Slot::Green);
        let spec = build_swarm_service_spec("acme", "acme-network", &deployment, &deployment.snapshot, "nginx:latest", &[]);
        assert_eq!(spec.network_name, "acme-network");
        assert_eq!(spec.network_aliases, vec!["api".to_string(), "green-api".to_string()]);
        assert_eq!(spec.memory_bytes, Some(256 * 1024 * 1024));
    }

    #[test]
    fn deployment_preview_domain_prefixes_the_hash() {
        let deployment = bare_deployment(Slot::Blue);
        let domain = format!("{}.example.com", deployment.hash);
        assert_eq!(domain, "d-abc123.example.com");
    }
}
