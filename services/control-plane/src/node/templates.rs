//! Typed rendering of the remote scripts.
//!
//! Every script in `scripts/` is a tera template. Each script has a parameter
//! struct here whose serialized fields form the template context. Shell
//! scripts pass every value through the `shell_quote` filter; the systemd unit
//! is rendered without it.

use std::collections::HashMap;

use serde::Serialize;
use tera::{Context, Tera, Value};
use thiserror::Error;

/// Template rendering errors.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template {template} is malformed: {}", error_chain(error))]
    Parse {
        template: &'static str,
        error: tera::Error,
    },

    #[error("template {template} failed to render: {}", error_chain(error))]
    Render {
        template: &'static str,
        error: tera::Error,
    },
}

/// A script and the parameters it is rendered with.
pub trait ScriptTemplate: Serialize {
    /// Name used in error messages and logs.
    const NAME: &'static str;

    /// Template text.
    const SOURCE: &'static str;

    fn context(&self) -> tera::Result<Context> {
        Context::from_serialize(self)
    }

    fn render(&self) -> Result<String, TemplateError>
    where
        Self: Sized,
    {
        render(self)
    }
}

/// Quote a value for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn shell_quote_filter(value: &Value, _args: &HashMap<String, Value>) -> tera::Result<Value> {
    let quoted = match value {
        Value::String(text) => shell_quote(text),
        other => shell_quote(&other.to_string()),
    };
    Ok(Value::String(quoted))
}

fn render<T: ScriptTemplate>(params: &T) -> Result<String, TemplateError> {
    let mut tera = Tera::default();
    tera.register_filter("shell_quote", shell_quote_filter);
    tera.add_raw_template(T::NAME, T::SOURCE)
        .map_err(|error| TemplateError::Parse {
            template: T::NAME,
            error,
        })?;

    let render_error = |error: tera::Error| TemplateError::Render {
        template: T::NAME,
        error,
    };
    let context = params.context().map_err(render_error)?;
    tera.render(T::NAME, &context).map_err(render_error)
}

/// tera nests the useful message (the missing variable, the parse
/// position) under a generic "failed to render" error.
fn error_chain(error: &tera::Error) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = std::error::Error::source(cause);
    }
    message
}

// ============================================================================
// Read-only queries
// ============================================================================

/// Lists every non-global zone with its state.
#[derive(Serialize)]
pub struct ListZones;

impl ScriptTemplate for ListZones {
    const NAME: &'static str = "list_zones";
    const SOURCE: &'static str = include_str!("../../scripts/list_zones.sh");

    fn context(&self) -> tera::Result<Context> {
        Ok(Context::new())
    }
}

/// Dumps the full configuration of every non-global zone.
#[derive(Serialize)]
pub struct GetZones;

impl ScriptTemplate for GetZones {
    const NAME: &'static str = "get_zones";
    const SOURCE: &'static str = include_str!("../../scripts/get_zones.sh");

    fn context(&self) -> tera::Result<Context> {
        Ok(Context::new())
    }
}

/// Lists a single zone with its state.
#[derive(Serialize)]
pub struct ListZone<'a> {
    pub zone_name: &'a str,
}

impl ScriptTemplate for ListZone<'_> {
    const NAME: &'static str = "list_zone";
    const SOURCE: &'static str = include_str!("../../scripts/list_zone.sh");
}

/// Dumps the configuration of a single zone.
#[derive(Serialize)]
pub struct GetZone<'a> {
    pub zone_name: &'a str,
}

impl ScriptTemplate for GetZone<'_> {
    const NAME: &'static str = "get_zone";
    const SOURCE: &'static str = include_str!("../../scripts/get_zone.sh");
}

// ============================================================================
// Networking
// ============================================================================

#[derive(Serialize)]
pub struct CreateVnic<'a> {
    pub link: &'a str,
    pub over: &'a str,
}

impl ScriptTemplate for CreateVnic<'_> {
    const NAME: &'static str = "create_vnic";
    const SOURCE: &'static str = include_str!("../../scripts/create_vnic.sh");
}

#[derive(Serialize)]
pub struct DeleteVnic<'a> {
    pub link: &'a str,
}

impl ScriptTemplate for DeleteVnic<'_> {
    const NAME: &'static str = "delete_vnic";
    const SOURCE: &'static str = include_str!("../../scripts/delete_vnic.sh");
}

// ============================================================================
// Zone lifecycle
// ============================================================================

#[derive(Serialize)]
pub struct BootZone<'a> {
    pub zone_name: &'a str,
}

impl ScriptTemplate for BootZone<'_> {
    const NAME: &'static str = "boot_zone";
    const SOURCE: &'static str = include_str!("../../scripts/boot_zone.sh");
}

#[derive(Serialize)]
pub struct StopZone<'a> {
    pub zone_name: &'a str,
}

impl ScriptTemplate for StopZone<'_> {
    const NAME: &'static str = "stop_zone";
    const SOURCE: &'static str = include_str!("../../scripts/stop_zone.sh");
}

/// Contents the creation script writes to its staged paths before creating
/// the zone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StagedArtifacts {
    /// Zone descriptor fed to `zadm create`.
    pub config_json: String,
    /// Rendered [`ServiceUnit`].
    pub unit_file: String,
    /// Rendered [`SetupZone`].
    pub setup_script: String,
}

/// Stages the artifacts, then creates and installs a zone from them.
///
/// Paths ending in `_staged_path` are where the artifacts are written;
/// `_zone_path` values are the same files seen from the global zone inside
/// the new zone's root, and `_internal_path` values are how the zone itself
/// sees them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateZone {
    pub brand: String,
    pub image_uri: String,
    pub zone_name: String,
    pub config_path: String,
    pub resolv_conf_path: String,
    pub unit_staged_path: String,
    pub unit_zone_path: String,
    pub unit_internal_path: String,
    pub unit_wants_path: String,
    pub setup_staged_path: String,
    pub setup_zone_path: String,
    pub setup_internal_path: String,
    #[serde(flatten)]
    pub artifacts: StagedArtifacts,
}

impl CreateZone {
    /// Derive every path from the zone's name, its zone path and the unit
    /// name of its service.
    pub fn new(
        brand: &str,
        image_uri: &str,
        zone_name: &str,
        zone_path: &str,
        unit: &str,
        artifacts: StagedArtifacts,
    ) -> Self {
        let root = format!("{zone_path}/root");
        Self {
            brand: brand.to_string(),
            image_uri: image_uri.to_string(),
            zone_name: zone_name.to_string(),
            config_path: staged_config_path(zone_name),
            resolv_conf_path: format!("{root}/etc/resolv.conf"),
            unit_staged_path: staged_unit_path(zone_name),
            unit_zone_path: format!("{root}/etc/systemd/system/{unit}.service"),
            unit_internal_path: format!("/etc/systemd/system/{unit}.service"),
            unit_wants_path: format!(
                "{root}/etc/systemd/system/multi-user.target.wants/{unit}.service"
            ),
            setup_staged_path: staged_setup_path(zone_name),
            setup_zone_path: format!("{root}{SETUP_INTERNAL_PATH}"),
            setup_internal_path: SETUP_INTERNAL_PATH.to_string(),
            artifacts,
        }
    }
}

/// Where the setup script lives inside a zone.
pub const SETUP_INTERNAL_PATH: &str = "/opt/build.sh";

pub fn staged_config_path(zone_name: &str) -> String {
    format!("/tmp/{zone_name}.json")
}

pub fn staged_unit_path(zone_name: &str) -> String {
    format!("/tmp/{zone_name}.service")
}

pub fn staged_setup_path(zone_name: &str) -> String {
    format!("/tmp/{zone_name}-setup.sh")
}

impl ScriptTemplate for CreateZone {
    const NAME: &'static str = "create_zone";
    const SOURCE: &'static str = include_str!("../../scripts/create_zone.sh");
}

// ============================================================================
// Staged artifacts
// ============================================================================

/// First-boot script copied into every zone. Takes no parameters.
#[derive(Serialize)]
pub struct SetupZone;

impl ScriptTemplate for SetupZone {
    const NAME: &'static str = "setup_zone";
    const SOURCE: &'static str = include_str!("../../scripts/setup_zone.sh");

    fn context(&self) -> tera::Result<Context> {
        Ok(Context::new())
    }
}

/// systemd unit for a zone's service. Values are written verbatim.
#[derive(Serialize)]
pub struct ServiceUnit<'a> {
    pub description: &'a str,
    pub user: &'a str,
    pub working_dir: &'a str,
    pub command: &'a str,
    pub environment: &'a str,
}

impl ScriptTemplate for ServiceUnit<'_> {
    const NAME: &'static str = "service_unit";
    const SOURCE: &'static str = include_str!("../../scripts/service_unit.service");
}
