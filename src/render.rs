//! WireGuard interface config rendering

use minijinja::{Environment, UndefinedBehavior};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{RenderError, ValidationError};
use crate::validation;

const TEMPLATE_NAME: &str = "interface.conf";

const INTERFACE_TEMPLATE: &str = r#"[Interface]
Address = {{ address }}
ListenPort = {{ listen_port }}
PrivateKey = {{ private_key }}
{% if dns is not none %}
DNS = {{ dns }}
{% endif %}
{% if table_off %}
Table = off
{% elif table_value is not none %}
Table = {{ table_value }}
{% else %}
Table = auto
{% endif %}
{% if pre_up is not none %}
PreUp = {{ pre_up }}
{% endif %}
{% if post_up is not none %}
PostUp = {{ post_up }}
{% endif %}
{% if pre_down is not none %}
PreDown = {{ pre_down }}
{% endif %}
{% if post_down is not none %}
PostDown = {{ post_down }}
{% endif %}
"#;

/// Routing table handling for the interface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TableMode {
    /// Do not create routes
    #[default]
    Off,
    /// Put routes in the given table
    Value(u32),
    /// Let wg-quick pick the table
    Auto,
}

impl FromStr for TableMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "off" => Ok(TableMode::Off),
            "auto" => Ok(TableMode::Auto),
            other => other.parse::<u32>().map(TableMode::Value).map_err(|_| {
                ValidationError::new(format!(
                    "Invalid table '{}': expected 'off', 'auto' or a table number",
                    other
                ))
            }),
        }
    }
}

impl fmt::Display for TableMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableMode::Off => write!(f, "off"),
            TableMode::Value(table) => write!(f, "{}", table),
            TableMode::Auto => write!(f, "auto"),
        }
    }
}

/// Commands wg-quick runs around bringing the interface up or down
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleHooks {
    #[serde(default)]
    pub pre_up: Option<String>,
    #[serde(default)]
    pub post_up: Option<String>,
    #[serde(default)]
    pub pre_down: Option<String>,
    #[serde(default)]
    pub post_down: Option<String>,
}

/// Everything in an interface config besides address, port and key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceProfile {
    pub dns: Option<String>,
    pub table: TableMode,
    pub hooks: LifecycleHooks,
}

/// Input for one render call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceOptions {
    pub address: String,
    pub listen_port: u16,
    pub private_key: String,
    pub dns: Option<String>,
    pub table: TableMode,
    pub hooks: LifecycleHooks,
}

impl InterfaceOptions {
    /// Options with no DNS, routing table off and no hooks
    pub fn new(address: impl Into<String>, listen_port: u16, private_key: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            listen_port,
            private_key: private_key.into(),
            dns: None,
            table: TableMode::Off,
            hooks: LifecycleHooks::default(),
        }
    }

    pub fn with_profile(mut self, profile: InterfaceProfile) -> Self {
        self.dns = profile.dns;
        self.table = profile.table;
        self.hooks = profile.hooks;
        self
    }
}

/// Interface address as `addr/mask`
///
/// The two parts are joined verbatim; nothing is stripped from `addr`.
pub fn compose_address(addr: &str, mask: &str) -> String {
    format!("{}/{}", addr, mask)
}

#[derive(Serialize)]
struct TemplateContext<'a> {
    address: &'a str,
    listen_port: u16,
    private_key: &'a str,
    dns: Option<&'a str>,
    table_off: bool,
    table_value: Option<u32>,
    pre_up: Option<&'a str>,
    post_up: Option<&'a str>,
    pre_down: Option<&'a str>,
    post_down: Option<&'a str>,
}

/// Renders [`InterfaceOptions`] into wg-quick config text
pub struct ConfigRenderer {
    env: Environment<'static>,
}

impl ConfigRenderer {
    pub fn new() -> Result<Self, RenderError> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.add_template(TEMPLATE_NAME, INTERFACE_TEMPLATE)?;
        Ok(Self { env })
    }

    /// Render the `[Interface]` section
    ///
    /// # Errors
    ///
    /// `RenderError::InvalidValue` names the first field whose value is empty
    /// or contains a line break or other control character.
    pub fn render(&self, options: &InterfaceOptions) -> Result<String, RenderError> {
        check("address", &options.address)?;
        check("private_key", &options.private_key)?;
        let hooks = &options.hooks;
        for (field, value) in [
            ("dns", &options.dns),
            ("pre_up", &hooks.pre_up),
            ("post_up", &hooks.post_up),
            ("pre_down", &hooks.pre_down),
            ("post_down", &hooks.post_down),
        ] {
            if let Some(value) = value {
                check(field, value)?;
            }
        }

        let ctx = TemplateContext {
            address: &options.address,
            listen_port: options.listen_port,
            private_key: &options.private_key,
            dns: options.dns.as_deref(),
            table_off: options.table == TableMode::Off,
            table_value: match options.table {
                TableMode::Value(table) => Some(table),
                _ => None,
            },
            pre_up: hooks.pre_up.as_deref(),
            post_up: hooks.post_up.as_deref(),
            pre_down: hooks.pre_down.as_deref(),
            post_down: hooks.post_down.as_deref(),
        };

        let template = self.env.get_template(TEMPLATE_NAME)?;
        Ok(template.render(ctx)?)
    }
}

fn check(field: &'static str, value: &str) -> Result<(), RenderError> {
    validation::validate_config_value(value).map_err(|e| RenderError::InvalidValue {
        field,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer() -> ConfigRenderer {
        ConfigRenderer::new().unwrap()
    }

    fn count_prefix(text: &str, prefix: &str) -> usize {
        text.lines().filter(|line| line.starts_with(prefix)).count()
    }

    #[test]
    fn test_minimal_config() {
        let text = renderer()
            .render(&InterfaceOptions::new("10.0.0.1/24", 51820, "abc"))
            .unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "[Interface]",
                "Address = 10.0.0.1/24",
                "ListenPort = 51820",
                "PrivateKey = abc",
                "Table = off",
            ]
        );
    }

    #[test]
    fn test_render_is_deterministic() {
        let options = InterfaceOptions::new("10.0.0.1/24", 51820, "abc").with_profile(InterfaceProfile {
            dns: Some("1.1.1.1".to_string()),
            table: TableMode::Value(100),
            hooks: LifecycleHooks {
                post_up: Some("iptables -A FORWARD -i %i -j ACCEPT".to_string()),
                ..Default::default()
            },
        });
        let r = renderer();
        assert_eq!(r.render(&options).unwrap(), r.render(&options).unwrap());
    }

    #[test]
    fn test_dns_line() {
        let r = renderer();
        let without = r.render(&InterfaceOptions::new("10.0.0.1/24", 51820, "abc")).unwrap();
        assert_eq!(count_prefix(&without, "DNS"), 0);

        let mut options = InterfaceOptions::new("10.0.0.1/24", 51820, "abc");
        options.dns = Some("10.0.0.53".to_string());
        let with = r.render(&options).unwrap();
        assert_eq!(count_prefix(&with, "DNS"), 1);
        assert!(with.contains("DNS = 10.0.0.53\n"));
        assert!(!with.contains("\n\n"));
    }

    #[test]
    fn test_exactly_one_table_line() {
        let r = renderer();
        for (mode, expected) in [
            (TableMode::Off, "Table = off"),
            (TableMode::Value(1234), "Table = 1234"),
            (TableMode::Auto, "Table = auto"),
        ] {
            let mut options = InterfaceOptions::new("10.0.0.1/24", 51820, "abc");
            options.table = mode;
            let text = r.render(&options).unwrap();
            assert_eq!(count_prefix(&text, "Table"), 1, "{}", text);
            assert!(text.lines().any(|line| line == expected), "{}", text);
        }
    }

    #[test]
    fn test_hooks_in_order() {
        let mut options = InterfaceOptions::new("10.0.0.1/24", 51820, "abc");
        options.hooks = LifecycleHooks {
            pre_up: Some("echo pre-up".to_string()),
            post_up: Some("echo post-up".to_string()),
            pre_down: None,
            post_down: Some("echo post-down".to_string()),
        };
        let text = renderer().render(&options).unwrap();
        let tail: Vec<&str> = text.lines().skip(5).collect();
        assert_eq!(
            tail,
            vec!["PreUp = echo pre-up", "PostUp = echo post-up", "PostDown = echo post-down"]
        );
    }

    #[test]
    fn test_rejects_line_breaks() {
        let mut options = InterfaceOptions::new("10.0.0.1/24", 51820, "abc");
        options.dns = Some("1.1.1.1\nPostUp = curl evil".to_string());
        let err = renderer().render(&options).unwrap_err();
        assert!(matches!(err, RenderError::InvalidValue { field: "dns", .. }));

        let options = InterfaceOptions::new("10.0.0.1/24", 51820, "");
        let err = renderer().render(&options).unwrap_err();
        assert!(matches!(err, RenderError::InvalidValue { field: "private_key", .. }));
    }

    #[test]
    fn test_table_mode_parsing() {
        assert_eq!("off".parse::<TableMode>().unwrap(), TableMode::Off);
        assert_eq!("auto".parse::<TableMode>().unwrap(), TableMode::Auto);
        assert_eq!("51820".parse::<TableMode>().unwrap(), TableMode::Value(51820));
        assert!("main".parse::<TableMode>().is_err());
        assert!("-1".parse::<TableMode>().is_err());
        assert_eq!(TableMode::Value(7).to_string(), "7");
    }

    #[test]
    fn test_compose_address() {
        assert_eq!(compose_address("10.0.0.1", "24"), "10.0.0.1/24");
        assert_eq!(compose_address("10.1.1.1/24", "24"), "10.1.1.1/24/24");
    }
}
