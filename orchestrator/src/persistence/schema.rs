pub const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS projects (
        id TEXT PRIMARY KEY,
        slug TEXT NOT NULL UNIQUE,
        status TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS environments (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        name TEXT NOT NULL,
        status TEXT NOT NULL,
        network_name TEXT NOT NULL,
        builder_name TEXT NOT NULL,
        preview TEXT,
        UNIQUE(project_id, name)
    );

    CREATE TABLE IF NOT EXISTS environment_variables (
        environment_id TEXT NOT NULL,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (environment_id, key)
    );

    CREATE TABLE IF NOT EXISTS services (
        id TEXT PRIMARY KEY,
        environment_id TEXT NOT NULL,
        slug TEXT NOT NULL,
        deploy_token TEXT NOT NULL,
        applied_spec TEXT,
        archived_at TEXT,
        UNIQUE(environment_id, slug)
    );

    CREATE TABLE IF NOT EXISTS volumes (
        id TEXT PRIMARY KEY,
        service_id TEXT NOT NULL,
        name TEXT NOT NULL,
        container_path TEXT NOT NULL,
        mode TEXT NOT NULL,
        host_path TEXT
    );

    CREATE TABLE IF NOT EXISTS configs (
        id TEXT PRIMARY KEY,
        service_id TEXT NOT NULL,
        name TEXT NOT NULL,
        contents TEXT NOT NULL,
        mount_path TEXT NOT NULL,
        language_hint TEXT
    );

    CREATE TABLE IF NOT EXISTS ports (
        id TEXT PRIMARY KEY,
        service_id TEXT NOT NULL,
        host_port INTEGER,
        forwarded_port INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS urls (
        id TEXT PRIMARY KEY,
        service_id TEXT NOT NULL,
        domain TEXT NOT NULL,
        base_path TEXT NOT NULL,
        strip_prefix INTEGER NOT NULL,
        associated_port INTEGER NOT NULL,
        redirect_url TEXT,
        redirect_permanent INTEGER,
        UNIQUE(domain, base_path)
    );

    CREATE TABLE IF NOT EXISTS healthchecks (
        service_id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        value TEXT NOT NULL,
        timeout_seconds INTEGER NOT NULL,
        interval_seconds INTEGER NOT NULL,
        associated_port INTEGER
    );

    CREATE TABLE IF NOT EXISTS changes (
        id TEXT PRIMARY KEY,
        service_id TEXT NOT NULL,
        field TEXT NOT NULL,
        change_type TEXT NOT NULL,
        new_value TEXT NOT NULL,
        old_value TEXT,
        item_id TEXT,
        applied INTEGER NOT NULL DEFAULT 0,
        deployment_id TEXT,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS deployments (
        id TEXT PRIMARY KEY,
        service_id TEXT NOT NULL,
        hash TEXT NOT NULL,
        slot TEXT NOT NULL,
        status TEXT NOT NULL,
        status_reason TEXT,
        queued_at TEXT NOT NULL,
        started_at TEXT,
        finished_at TEXT,
        build_started_at TEXT,
        build_finished_at TEXT,
        snapshot TEXT NOT NULL,
        changes TEXT NOT NULL,
        is_current_production INTEGER NOT NULL DEFAULT 0,
        commit_sha TEXT,
        commit_message TEXT,
        image_tag TEXT,
        network_alias TEXT NOT NULL,
        reached_swarm_service INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS deployment_urls (
        deployment_id TEXT NOT NULL,
        domain TEXT NOT NULL,
        PRIMARY KEY (deployment_id, domain)
    );

    CREATE TABLE IF NOT EXISTS archived_projects (
        id TEXT PRIMARY KEY,
        slug TEXT NOT NULL,
        archived_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS archived_environments (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        name TEXT NOT NULL,
        archived_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS archived_services (
        id TEXT PRIMARY KEY,
        environment_id TEXT NOT NULL,
        slug TEXT NOT NULL,
        teardown_manifest TEXT NOT NULL,
        archived_at TEXT NOT NULL
    );
";
