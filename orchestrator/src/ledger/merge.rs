use serde_json::Value;
use zane_common::model::{
    ChangeType, Config, Healthcheck, PortMapping, ResourceLimits, ServiceSource, ServiceSpec, UrlRoute, Volume,
};
use zane_common::{ConfigId, Error, ErrorKind, PortId, ServiceId, UrlId, VolumeId};

/// Mutates `spec` in place to reflect one change. Shared by effective-state
/// computation (replaying already-accepted pending changes) and by
/// `request_change`'s own dry-run of the candidate change.
pub fn apply_one(
    spec: &mut ServiceSpec,
    service_id: ServiceId,
    field: &str,
    change_type: ChangeType,
    item_id: Option<&str>,
    new_value: &Value,
) -> crate::error::Result<()> {
    match field {
        "source" => {
            spec.source = from_value::<ServiceSource>(new_value)?;
        }
        "command" => {
            spec.command = match change_type {
                ChangeType::Delete => None,
                _ => from_value::<Option<String>>(new_value)?,
            };
        }
        "resource_limits" => {
            spec.resource_limits = match change_type {
                ChangeType::Delete => None,
                _ => from_value::<Option<ResourceLimits>>(new_value)?,
            };
        }
        "healthcheck" => {
            spec.healthcheck = match change_type {
                ChangeType::Delete => None,
                _ => Some(from_value::<Healthcheck>(new_value)?),
            };
        }
        "env_var" => {
            let key = item_id.ok_or_else(|| invalid("env_var change is missing item_id"))?;
            match change_type {
                ChangeType::Add => {
                    if spec.env_vars.contains_key(key) {
                        return Err(invalid(format!("env var {key} already set")).into());
                    }
                    spec.env_vars.insert(key.to_string(), from_value::<String>(new_value)?);
                }
                ChangeType::Update => {
                    if !spec.env_vars.contains_key(key) {
                        return Err(invalid(format!("env var {key} does not exist")).into());
                    }
                    spec.env_vars.insert(key.to_string(), from_value::<String>(new_value)?);
                }
                ChangeType::Delete => {
                    if spec.env_vars.remove(key).is_none() {
                        return Err(invalid(format!("env var {key} does not exist")).into());
                    }
                }
            }
        }
        "volume" => apply_list_change(
            &mut spec.volumes,
            change_type,
            item_id,
            new_value,
            |v: &Volume| v.id.to_string(),
            |new_value, id: VolumeId| -> crate::error::Result<Volume> {
                #[derive(serde::Deserialize)]
                struct Draft {
                    name: String,
                    container_path: String,
                    mode: zane_common::model::AccessMode,
                    host_path: Option<String>,
                }
                let draft: Draft = from_value(new_value)?;
                Ok(Volume {
                    id,
                    service_id,
                    name: draft.name,
                    container_path: draft.container_path,
                    mode: draft.mode,
                    host_path: draft.host_path,
                })
            },
            VolumeId::new,
        )?,
        "config" => apply_list_change(
            &mut spec.configs,
            change_type,
            item_id,
            new_value,
            |c: &Config| c.id.to_string(),
            |new_value, id: ConfigId| -> crate::error::Result<Config> {
                #[derive(serde::Deserialize)]
                struct Draft {
                    name: String,
                    contents: String,
                    mount_path: String,
                    language_hint: Option<String>,
                }
                let draft: Draft = from_value(new_value)?;
                Ok(Config {
                    id,
                    service_id,
                    name: draft.name,
                    contents: draft.contents,
                    mount_path: draft.mount_path,
                    language_hint: draft.language_hint,
                })
            },
            ConfigId::new,
        )?,
        "port" => apply_list_change(
            &mut spec.ports,
            change_type,
            item_id,
            new_value,
            |p: &PortMapping| p.id.to_string(),
            |new_value, id: PortId| -> crate::error::Result<PortMapping> {
                #[derive(serde::Deserialize)]
                struct Draft {
                    host_port: Option<u16>,
                    forwarded_port: u16,
                }
                let draft: Draft = from_value(new_value)?;
                Ok(PortMapping {
                    id,
                    service_id,
                    host_port: draft.host_port,
                    forwarded_port: draft.forwarded_port,
                })
            },
            PortId::new,
        )?,
        "url" => apply_list_change(
            &mut spec.urls,
            change_type,
            item_id,
            new_value,
            |u: &UrlRoute| u.id.to_string(),
            |new_value, id: UrlId| -> crate::error::Result<UrlRoute> {
                #[derive(serde::Deserialize)]
                struct Draft {
                    domain: String,
                    base_path: String,
                    strip_prefix: bool,
                    associated_port: u16,
                    redirect: Option<zane_common::model::RedirectTarget>,
                }
                let draft: Draft = from_value(new_value)?;
                Ok(UrlRoute {
                    id,
                    service_id,
                    domain: draft.domain,
                    base_path: draft.base_path,
                    strip_prefix: draft.strip_prefix,
                    associated_port: draft.associated_port,
                    redirect: draft.redirect,
                })
            },
            UrlId::new,
        )?,
        other => return Err(invalid(format!("unknown change field: {other}")).into()),
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn apply_list_change<T, IdOf, Build, NewId, Id>(
    list: &mut Vec<T>,
    change_type: ChangeType,
    item_id: Option<&str>,
    new_value: &Value,
    id_of: IdOf,
    build: Build,
    new_id: NewId,
) -> crate::error::Result<()>
where
    IdOf: Fn(&T) -> String,
    Build: Fn(&Value, Id) -> crate::error::Result<T>,
    NewId: Fn() -> Id,
    Id: std::str::FromStr,
{
    match change_type {
        ChangeType::Add => {
            let id = new_id();
            list.push(build(new_value, id)?);
        }
        ChangeType::Update => {
            let item_id = item_id.ok_or_else(|| invalid("update change is missing item_id"))?;
            let index = list
                .iter()
                .position(|item| id_of(item) == item_id)
                .ok_or_else(|| invalid(format!("item {item_id} does not exist")))?;
            let id = item_id
                .parse::<Id>()
                .map_err(|_| invalid(format!("malformed item id {item_id}")))?;
            list[index] = build(new_value, id)?;
        }
        ChangeType::Delete => {
            let item_id = item_id.ok_or_else(|| invalid("delete change is missing item_id"))?;
            let before = list.len();
            list.retain(|item| id_of(item) != item_id);
            if list.len() == before {
                return Err(invalid(format!("item {item_id} does not exist")).into());
            }
        }
    }
    Ok(())
}

fn from_value<T: serde::de::DeserializeOwned>(value: &Value) -> crate::error::Result<T> {
    serde_json::from_value(value.clone()).map_err(|e| invalid(format!("malformed change payload: {e}")).into())
}

fn invalid(message: impl Into<String>) -> Error {
    Error::custom(ErrorKind::InvalidChange, message.into())
}
