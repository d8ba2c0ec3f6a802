/// Totally ordered deployment workflow steps. Git deployments insert four
/// extra steps between `Initialized` and `VolumesCreated`; Docker-image
/// deployments skip straight from `Initialized` to `VolumesCreated`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStep {
    Initialized,
    CloningRepository,
    RepositoryCloned,
    BuildingImage,
    ImageBuilt,
    VolumesCreated,
    ConfigsCreated,
    PreviousDeploymentScaledDown,
    SwarmServiceCreated,
    DeploymentExposedToHttp,
    ServiceExposedToHttp,
    Finished,
}

impl DeploymentStep {
    pub fn is_git_only(self) -> bool {
        matches!(
            self,
            DeploymentStep::CloningRepository | DeploymentStep::RepositoryCloned | DeploymentStep::BuildingImage | DeploymentStep::ImageBuilt
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_order_git_stages_before_volumes_created() {
        assert!(DeploymentStep::CloningRepository < DeploymentStep::VolumesCreated);
        assert!(DeploymentStep::ImageBuilt < DeploymentStep::VolumesCreated);
    }

    #[test]
    fn common_tail_is_ordered() {
        assert!(DeploymentStep::VolumesCreated < DeploymentStep::ConfigsCreated);
        assert!(DeploymentStep::ConfigsCreated < DeploymentStep::PreviousDeploymentScaledDown);
        assert!(DeploymentStep::PreviousDeploymentScaledDown < DeploymentStep::SwarmServiceCreated);
        assert!(DeploymentStep::SwarmServiceCreated < DeploymentStep::DeploymentExposedToHttp);
        assert!(DeploymentStep::DeploymentExposedToHttp < DeploymentStep::ServiceExposedToHttp);
        assert!(DeploymentStep::ServiceExposedToHttp < DeploymentStep::Finished);
    }
}
