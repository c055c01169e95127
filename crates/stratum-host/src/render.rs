use crate::backend::TemplateRenderer;
use crate::HostError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Excerpt of the stock mime-magic database; enough for mod_mime_magic to
/// start with.
const MAGIC: &str = "\
# Magic data for mod_mime_magic Apache module
0\tstring\t\\037\\213\tapplication/x-gzip
0\tstring\tBZh\tapplication/x-bzip2
0\tstring\t%PDF-\tapplication/pdf
0\tstring\t\\x89PNG\timage/png
0\tstring\tGIF8\timage/gif
";

/// Built-in renderer for the configuration templates the plan references.
///
/// Rendering is a pure function of the template id and variables, so rendered
/// content is stable across runs and usable for divergence comparison.
#[derive(Debug, Default)]
pub struct ConfRenderer;

impl ConfRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl TemplateRenderer for ConfRenderer {
    fn render(
        &self,
        template_id: &str,
        variables: &BTreeMap<String, Value>,
    ) -> Result<Vec<u8>, HostError> {
        match template_id {
            "magic" => Ok(MAGIC.as_bytes().to_vec()),
            "module.load" => render_module_load(variables),
            "mpm.conf" => render_mpm_conf(variables),
            "httpd.conf" => render_main_conf(variables),
            other => Err(HostError::UnknownTemplate(other.to_owned())),
        }
    }
}

fn require_str<'a>(
    template: &str,
    variables: &'a BTreeMap<String, Value>,
    name: &str,
) -> Result<&'a str, HostError> {
    variables
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| HostError::MissingVariable {
            template: template.to_owned(),
            name: name.to_owned(),
        })
}

/// Absent is acceptable: a `Null` or missing variable renders nothing.
fn optional_str<'a>(variables: &'a BTreeMap<String, Value>, name: &str) -> Option<&'a str> {
    variables.get(name).and_then(Value::as_str)
}

fn str_list<'a>(variables: &'a BTreeMap<String, Value>, name: &str) -> Vec<&'a str> {
    variables
        .get(name)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

fn render_module_load(variables: &BTreeMap<String, Value>) -> Result<Vec<u8>, HostError> {
    let module = require_str("module.load", variables, "module")?;
    Ok(format!("LoadModule {module}_module modules/mod_{module}.so\n").into_bytes())
}

fn render_mpm_conf(variables: &BTreeMap<String, Value>) -> Result<Vec<u8>, HostError> {
    let mpm = require_str("mpm.conf", variables, "mpm")?;
    let mut out = String::new();
    let _ = writeln!(out, "# {mpm} MPM tuning");
    let _ = writeln!(out, "<IfModule mpm_{mpm}_module>");
    let _ = writeln!(out, "  StartServers          3");
    let _ = writeln!(out, "  MinSpareThreads      25");
    let _ = writeln!(out, "  MaxSpareThreads      75");
    let _ = writeln!(out, "  MaxRequestWorkers   256");
    let _ = writeln!(out, "</IfModule>");
    Ok(out.into_bytes())
}

fn render_main_conf(variables: &BTreeMap<String, Value>) -> Result<Vec<u8>, HostError> {
    let server_root = require_str("httpd.conf", variables, "server_root")?;
    let error_log = require_str("httpd.conf", variables, "error_log")?;
    let pid_file = require_str("httpd.conf", variables, "pid_file")?;

    let mut out = String::new();
    let _ = writeln!(out, "# Managed by stratum. Local changes will be overwritten.");
    let _ = writeln!(out, "ServerRoot \"{server_root}\"");
    let _ = writeln!(out, "Listen 80");
    let _ = writeln!(out, "User apache");
    let _ = writeln!(out, "Group apache");
    let _ = writeln!(out, "ServerAdmin root@localhost");
    let _ = writeln!(out, "PidFile {pid_file}");
    if let Some(lock_file) = optional_str(variables, "lock_file") {
        let _ = writeln!(out, "LockFile {lock_file}");
    }
    if let Some(mutex) = optional_str(variables, "mutex") {
        let _ = writeln!(out, "Mutex {mutex}");
    }
    let _ = writeln!(out, "ErrorLog \"{error_log}\"");
    let _ = writeln!(out, "LogLevel warn");
    for pattern in str_list(variables, "includes") {
        let _ = writeln!(out, "Include {pattern}");
    }
    for pattern in str_list(variables, "include_optionals") {
        let _ = writeln!(out, "IncludeOptional {pattern}");
    }
    Ok(out.into_bytes())
}
