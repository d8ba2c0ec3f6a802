pub mod buildkit;
pub mod clone;
pub mod error;
pub mod image;
pub mod plan;

pub use buildkit::{builder_name_for_environment, delete_builder, ensure_builder};
pub use clone::{clone_and_checkout, GitCommit, REPOSITORY_CLONE_LOCATION};
pub use error::{Error, Result};
pub use image::{build_image, extract_image_id, strip_ansi, BuildArgs, BuildLogLine};
pub use plan::{
    build_context_env_file, build_static_railpack_config, generate_nixpacks_static_dockerfile,
    generate_static_caddyfile, generate_static_dockerfile, plan_dockerfile_builder, plan_nixpacks_builder,
    plan_railpack_builder, plan_static_dir_builder, DockerfilePlan, NixpacksPlan, RailpackPlan, StaticDirPlan,
};
