use ulid::Ulid;

/// Short opaque deployment hash, prefixed by a type marker so a reader can
/// tell at a glance whether a deployment built from a registry image or a
/// Git source without consulting the snapshot.
pub fn generate_deployment_hash(is_git: bool) -> String {
    let marker = if is_git { "g" } else { "d" };
    // Lowercase the Ulid's Crockford base32 and keep only the random part
    // (the last 16 chars) so hashes stay short while remaining sortable by
    // creation time isn't a requirement we need to preserve here.
    let ulid = Ulid::new().to_string().to_lowercase();
    let short = &ulid[ulid.len() - 12..];
    format!("{marker}-{short}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn docker_hash_uses_d_marker() {
        assert!(generate_deployment_hash(false).starts_with("d-"));
    }

    #[test]
    fn git_hash_uses_g_marker() {
        assert!(generate_deployment_hash(true).starts_with("g-"));
    }

    #[test]
    fn hashes_are_unique() {
        assert_ne!(generate_deployment_hash(false), generate_deployment_hash(false));
    }
}
