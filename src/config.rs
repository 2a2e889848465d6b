//! Process configuration read from environment variables.
//!
//! [`AppConfig::from_env`] is what the binary uses. Library users that wire
//! the pieces themselves can skip this module and use the `with_*` builders
//! of [`DingTalkConfig`], [`ResolverPolicy`] and [`GatewaySettings`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::dingtalk::DingTalkConfig;
use crate::error::ConfigError;
use crate::gateway::GatewaySettings;
use crate::resolver::{AccountStrategy, ProjectMembership, ResolverPolicy};
use crate::store::DEFAULT_TICKET_TTL;
use crate::zentao::{AdminCredentials, ApiLoginSigner};

const DEFAULT_LISTEN: &str = "127.0.0.1:9000";
const DEFAULT_TABLE_PREFIX: &str = "zt_";
const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(300);

/// How accounts are created in ZenTao.
#[derive(Debug, Clone)]
pub enum ZenTaoBackend {
    /// Direct SQL against the ZenTao database.
    Mysql {
        database_url: String,
        table_prefix: String,
    },
    /// The `api.php/v1` REST API.
    Api {
        admin_token: Option<String>,
        credentials: Option<AdminCredentials>,
        default_password: Option<String>,
    },
}

/// Where bindings and tickets live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// `bindings.json` and `tickets.json` in a directory.
    File { dir: PathBuf },
    /// A SQLite database shared by every worker.
    Sqlite { url: String },
}

/// Static mappings loaded from `SSO_MAPPING_FILE`.
#[derive(Debug, Default, Deserialize)]
struct MappingFile {
    /// DingTalk user id → ZenTao account.
    #[serde(default)]
    accounts: HashMap<String, String>,
    /// DingTalk department id → ZenTao department id.
    #[serde(default)]
    departments: HashMap<String, u64>,
}

/// Everything the binary needs to start.
#[derive(Debug)]
pub struct AppConfig {
    pub listen: SocketAddr,
    pub dingtalk: DingTalkConfig,
    pub signer: ApiLoginSigner,
    pub zentao: ZenTaoBackend,
    pub store: StoreBackend,
    pub policy: ResolverPolicy,
    pub gateway: GatewaySettings,
    pub secure_cookies: bool,
    pub ticket_ttl: time::Duration,
    pub purge_interval: Duration,
}

impl AppConfig {
    /// Read configuration from the process environment.
    ///
    /// # Required env vars
    /// - `DINGTALK_APP_KEY`, `DINGTALK_APP_SECRET`
    /// - `ZENTAO_BASE`, `ZENTAO_APP_CODE`, `ZENTAO_APP_KEY`
    /// - `ZENTAO_DATABASE_URL` when `ZENTAO_CREATE_MODE` is `mysql` (the default)
    ///
    /// Everything else is optional; see the README for the full list.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a required variable is missing, a value does
    /// not parse, or the mapping file can not be read.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) but reading variables through `var`.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| var(name).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());
        let required = |name: &'static str| var(name).ok_or(ConfigError::Missing(name));

        let mut dingtalk =
            DingTalkConfig::new(required("DINGTALK_APP_KEY")?, required("DINGTALK_APP_SECRET")?);
        if let Some(url) = var("DINGTALK_API_URL") {
            dingtalk = dingtalk.with_api_base(parse_url("DINGTALK_API_URL", &url)?);
        }
        if let Some(url) = var("DINGTALK_AUTH_URL") {
            dingtalk = dingtalk.with_auth_url(parse_url("DINGTALK_AUTH_URL", &url)?);
        }

        let zentao_base = parse_url("ZENTAO_BASE", &required("ZENTAO_BASE")?)?;
        let signer = ApiLoginSigner::new(
            zentao_base.clone(),
            required("ZENTAO_APP_CODE")?,
            required("ZENTAO_APP_KEY")?,
        );

        let zentao = match var("ZENTAO_CREATE_MODE").as_deref().unwrap_or("mysql") {
            "mysql" => ZenTaoBackend::Mysql {
                database_url: required("ZENTAO_DATABASE_URL")?,
                table_prefix: var("ZENTAO_TABLE_PREFIX")
                    .unwrap_or_else(|| DEFAULT_TABLE_PREFIX.into()),
            },
            "api" => ZenTaoBackend::Api {
                admin_token: var("ZENTAO_ADMIN_TOKEN"),
                credentials: match (var("ZENTAO_ADMIN_ACCOUNT"), var("ZENTAO_ADMIN_PASSWORD")) {
                    (Some(account), Some(password)) => Some(AdminCredentials { account, password }),
                    _ => None,
                },
                default_password: var("ZENTAO_DEFAULT_PASSWORD"),
            },
            other => {
                return Err(ConfigError::invalid(
                    "ZENTAO_CREATE_MODE",
                    format!("expected \"mysql\" or \"api\", got {other:?}"),
                ));
            }
        };

        let store = match var("SSO_DATABASE_URL") {
            Some(url) => StoreBackend::Sqlite { url },
            None => StoreBackend::File {
                dir: var("SSO_DATA_DIR").map_or_else(|| PathBuf::from("."), PathBuf::from),
            },
        };

        let listen = var("SSO_LISTEN").unwrap_or_else(|| DEFAULT_LISTEN.into());
        let listen: SocketAddr = listen
            .parse()
            .map_err(|e| ConfigError::invalid("SSO_LISTEN", e))?;

        let public_base = match var("SSO_PUBLIC_BASE") {
            Some(url) => parse_url("SSO_PUBLIC_BASE", &url)?,
            None => zentao_base,
        };
        let mut gateway = GatewaySettings::new(public_base)
            .with_sync_enabled(parse_flag(&var, "SSO_SYNC_ENABLED")?.unwrap_or(false));
        if let Some(path) = var("SSO_BASE_PATH") {
            gateway = gateway.with_base_path(path);
        }

        let policy = resolver_policy(&var)?;

        let ticket_ttl = match parse_number::<i64>(&var, "SSO_TICKET_TTL_SECS")? {
            Some(secs) if secs > 0 => time::Duration::seconds(secs),
            Some(_) => return Err(ConfigError::invalid("SSO_TICKET_TTL_SECS", "must be positive")),
            None => DEFAULT_TICKET_TTL,
        };
        let purge_interval = match parse_number::<u64>(&var, "SSO_TICKET_PURGE_SECS")? {
            Some(0) => {
                return Err(ConfigError::invalid("SSO_TICKET_PURGE_SECS", "must be positive"));
            }
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_PURGE_INTERVAL,
        };

        Ok(Self {
            listen,
            dingtalk,
            signer,
            zentao,
            store,
            policy,
            gateway,
            secure_cookies: parse_flag(&var, "SSO_SECURE_COOKIES")?.unwrap_or(false),
            ticket_ttl,
            purge_interval,
        })
    }
}

fn resolver_policy(var: &impl Fn(&str) -> Option<String>) -> Result<ResolverPolicy, ConfigError> {
    let mut policy = ResolverPolicy::default();

    if let Some(path) = var("SSO_MAPPING_FILE") {
        let mapping = load_mapping(Path::new(&path))?;
        policy = policy
            .with_static_accounts(mapping.accounts)
            .with_department_map(mapping.departments);
    }
    if let Some(strategy) = var("SSO_ACCOUNT_STRATEGY") {
        let strategy = AccountStrategy::from_str(&strategy)
            .map_err(|e| ConfigError::invalid("SSO_ACCOUNT_STRATEGY", e))?;
        policy = policy.with_strategy(strategy);
    }
    if let Some(enabled) = parse_flag(var, "SSO_BIND_BY_REALNAME")? {
        policy = policy.with_bind_by_display_name(enabled);
    }
    if let Some(allowed) = parse_flag(var, "SSO_ALLOW_AUTO_CREATE")? {
        policy = policy.with_allow_auto_create(allowed);
    }
    if let Some(groups) = var("SSO_DEFAULT_GROUPS") {
        policy = policy.with_default_groups(
            groups
                .split(',')
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .map(str::to_owned)
                .collect(),
        );
    }
    if let Some(dept) = parse_number::<u64>(var, "SSO_DEFAULT_DEPT")? {
        policy = policy.with_default_department(dept);
    }
    if let Some(project_id) = parse_number::<u64>(var, "SSO_PROJECT_ID")?.filter(|id| *id > 0) {
        policy = policy.with_project(Some(ProjectMembership {
            project_id,
            role: var("SSO_PROJECT_ROLE").unwrap_or_else(|| "pm".into()),
        }));
    }
    Ok(policy)
}

fn load_mapping(path: &Path) -> Result<MappingFile, ConfigError> {
    let mapping_error = |detail: String| ConfigError::Mapping {
        path: path.display().to_string(),
        detail,
    };
    let text = std::fs::read_to_string(path).map_err(|e| mapping_error(e.to_string()))?;
    serde_json::from_str(&text).map_err(|e| mapping_error(e.to_string()))
}

fn parse_url(name: &'static str, value: &str) -> Result<Url, ConfigError> {
    value.parse().map_err(|e| ConfigError::invalid(name, e))
}

fn parse_flag(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<bool>, ConfigError> {
    let Some(value) = var(name) else {
        return Ok(None);
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::invalid(name, format!("expected a boolean, got {value:?}"))),
    }
}

fn parse_number<T>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    var(name)
        .map(|v| v.parse::<T>().map_err(|e| ConfigError::invalid(name, e)))
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn base_env() -> HashMap<&'static str, String> {
        HashMap::from([
            ("DINGTALK_APP_KEY", "ding-key".to_string()),
            ("DINGTALK_APP_SECRET", "ding-secret".to_string()),
            ("ZENTAO_BASE", "http://zentao.example.cn/".to_string()),
            ("ZENTAO_APP_CODE", "DingTalk_Login".to_string()),
            ("ZENTAO_APP_KEY", "secret".to_string()),
            ("ZENTAO_DATABASE_URL", "mysql://zentao@localhost/zentao".to_string()),
        ])
    }

    fn load(env: &HashMap<&'static str, String>) -> Result<AppConfig, ConfigError> {
        AppConfig::from_lookup(|name| env.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&base_env()).unwrap();
        assert_eq!(config.listen, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.gateway.base_path(), "/dingtalk");
        assert_eq!(config.gateway.public_base().as_str(), "http://zentao.example.cn/");
        assert_eq!(config.store, StoreBackend::File { dir: PathBuf::from(".") });
        assert_eq!(config.ticket_ttl, DEFAULT_TICKET_TTL);
        assert!(!config.secure_cookies);
        assert!(config.policy.allow_auto_create);
        assert_eq!(config.policy.default_groups, vec!["pm".to_string()]);
        match config.zentao {
            ZenTaoBackend::Mysql { table_prefix, .. } => assert_eq!(table_prefix, "zt_"),
            other => panic!("unexpected backend {other:?}"),
        }
    }

    #[test]
    fn missing_required_var_is_named() {
        let mut env = base_env();
        env.remove("ZENTAO_APP_KEY");
        let err = load(&env).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("ZENTAO_APP_KEY")));
    }

    #[test]
    fn api_mode_does_not_need_a_database() {
        let mut env = base_env();
        env.remove("ZENTAO_DATABASE_URL");
        env.insert("ZENTAO_CREATE_MODE", "api".into());
        env.insert("ZENTAO_ADMIN_ACCOUNT", "admin".into());
        env.insert("ZENTAO_ADMIN_PASSWORD", "pw".into());

        let config = load(&env).unwrap();
        match config.zentao {
            ZenTaoBackend::Api { credentials, admin_token, .. } => {
                assert_eq!(credentials.unwrap().account, "admin");
                assert!(admin_token.is_none());
            }
            other => panic!("unexpected backend {other:?}"),
        }
    }

    #[test]
    fn policy_overrides() {
        let mut env = base_env();
        env.insert("SSO_ACCOUNT_STRATEGY", "realname".into());
        env.insert("SSO_BIND_BY_REALNAME", "1".into());
        env.insert("SSO_ALLOW_AUTO_CREATE", "false".into());
        env.insert("SSO_DEFAULT_GROUPS", "dev, qa,".into());
        env.insert("SSO_PROJECT_ID", "12".into());
        env.insert("SSO_DATABASE_URL", "sqlite://sso.db".into());

        let config = load(&env).unwrap();
        assert_eq!(config.policy.strategy, AccountStrategy::DisplayName);
        assert!(config.policy.bind_by_display_name);
        assert!(!config.policy.allow_auto_create);
        assert_eq!(config.policy.default_groups, vec!["dev".to_string(), "qa".to_string()]);
        assert_eq!(
            config.policy.project,
            Some(ProjectMembership {
                project_id: 12,
                role: "pm".into()
            })
        );
        assert_eq!(config.store, StoreBackend::Sqlite { url: "sqlite://sso.db".into() });

        env.insert("SSO_PROJECT_ROLE", "dev".into());
        let config = load(&env).unwrap();
        assert_eq!(config.policy.project.unwrap().role, "dev");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut env = base_env();
        env.insert("SSO_SECURE_COOKIES", "maybe".into());
        assert!(matches!(
            load(&env).unwrap_err(),
            ConfigError::Invalid { name: "SSO_SECURE_COOKIES", .. }
        ));

        let mut env = base_env();
        env.insert("ZENTAO_CREATE_MODE", "ldap".into());
        assert!(matches!(
            load(&env).unwrap_err(),
            ConfigError::Invalid { name: "ZENTAO_CREATE_MODE", .. }
        ));

        let mut env = base_env();
        env.insert("SSO_TICKET_TTL_SECS", "0".into());
        assert!(load(&env).is_err());
    }

    #[test]
    fn mapping_file_feeds_the_policy() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"accounts": {{"u001": "zhangsan"}}, "departments": {{"100": 3}}}}"#
        )
        .unwrap();

        let mut env = base_env();
        env.insert("SSO_MAPPING_FILE", file.path().display().to_string());
        let config = load(&env).unwrap();
        assert_eq!(config.policy.static_accounts["u001"], "zhangsan");
        assert_eq!(config.policy.department_map["100"], 3);
    }

    #[test]
    fn unreadable_mapping_file_is_an_error() {
        let mut env = base_env();
        env.insert("SSO_MAPPING_FILE", "/nonexistent/mapping.json".into());
        assert!(matches!(load(&env).unwrap_err(), ConfigError::Mapping { .. }));
    }
}
