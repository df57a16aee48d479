//! Operator-template rendering.
//!
//! The template is an opaque handlebars document supplied by the operator;
//! the engine only provides the context: `containerId`, `configList`,
//! `container` (the descriptor) and `output`. Two helpers are exposed for
//! templates that splice environment-driven settings into the rendered
//! fragment.

use crate::error::Result;
use crate::log_config::LogConfig;
use handlebars::{
    Context, Handlebars, Helper, HelperResult, Output, RenderContext, RenderErrorReason,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::env;

const TEMPLATE_NAME: &str = "pilot";

/// Compiled operator template plus helper registrations.
pub struct Renderer {
    registry: Handlebars<'static>,
}

impl Renderer {
    /// Compile the operator template. A parse error here is fatal for the
    /// whole engine.
    pub fn new(template: &str) -> Result<Self> {
        let mut registry = Handlebars::new();
        // rendered fragments are shipper config, not HTML
        registry.register_escape_fn(handlebars::no_escape);
        registry.register_helper("putIfEnvNotEmpty", Box::new(put_if_env_not_empty));
        registry.register_helper("envArray", Box::new(env_array));
        registry.register_template_string(TEMPLATE_NAME, template)?;
        Ok(Self { registry })
    }

    /// Render the per-container configuration fragment.
    pub fn render(
        &self,
        container_id: &str,
        descriptor: &BTreeMap<String, String>,
        configs: &[LogConfig],
        output: &str,
    ) -> Result<String> {
        let context = json!({
            "containerId": container_id,
            "configList": configs,
            "container": descriptor,
            "output": output,
        });
        Ok(self.registry.render(TEMPLATE_NAME, &context)?)
    }
}

/// `{{putIfEnvNotEmpty "key" "ENV_VAR" ["default"]}}`: emits `key: value`
/// when the variable is set and non-empty, falls back to the default when
/// given, and emits nothing otherwise.
fn put_if_env_not_empty(
    h: &Helper<'_>,
    _: &Handlebars<'_>,
    _: &Context,
    _: &mut RenderContext<'_, '_>,
    out: &mut dyn Output,
) -> HelperResult {
    let key = h
        .param(0)
        .and_then(|p| p.value().as_str())
        .ok_or_else(|| RenderErrorReason::ParamNotFoundForIndex("putIfEnvNotEmpty", 0))?;
    let env_var = h
        .param(1)
        .and_then(|p| p.value().as_str())
        .ok_or_else(|| RenderErrorReason::ParamNotFoundForIndex("putIfEnvNotEmpty", 1))?;
    let default = h
        .param(2)
        .and_then(|p| p.value().as_str())
        .unwrap_or("");

    let value = env::var(env_var)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string());
    if !value.is_empty() {
        out.write(&format!("{key}: {value}"))?;
    }
    Ok(())
}

/// `{{envArray "ENV_VAR"}}`: splits the variable's value on `,` and emits a
/// quoted array literal.
fn env_array(
    h: &Helper<'_>,
    _: &Handlebars<'_>,
    _: &Context,
    _: &mut RenderContext<'_, '_>,
    out: &mut dyn Output,
) -> HelperResult {
    let env_var = h
        .param(0)
        .and_then(|p| p.value().as_str())
        .ok_or_else(|| RenderErrorReason::ParamNotFoundForIndex("envArray", 0))?;

    let raw = env::var(env_var).unwrap_or_default();
    let items: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| format!("\"{item}\""))
        .collect();
    out.write(&format!("[{}]", items.join(",")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label_tree::build_log_tree;
    use crate::log_config::compile;
    use crate::config::ShipperKind;
    use std::collections::HashMap;

    fn test_configs() -> Vec<LogConfig> {
        let labels: BTreeMap<String, String> = [
            ("aliyun.logs.app".to_string(), "stdout".to_string()),
            ("aliyun.logs.app.tags".to_string(), "env=prod".to_string()),
        ]
        .into_iter()
        .collect();
        let root = build_log_tree(&labels, &["aliyun".to_string()]).unwrap();
        root.children
            .iter()
            .map(|(name, node)| {
                compile(
                    name,
                    node,
                    "/var/lib/docker/containers/abc/abc.log",
                    &HashMap::new(),
                    "/host",
                    ShipperKind::Filebeat,
                )
                .unwrap()
            })
            .collect()
    }

    fn test_descriptor() -> BTreeMap<String, String> {
        [("docker_app".to_string(), "shop".to_string())]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_parse_error_is_fatal() {
        assert!(Renderer::new("{{#each configList}}").is_err());
    }

    #[test]
    fn test_render_context() {
        let renderer = Renderer::new(
            "{{containerId}}|{{output}}|{{lookup container \"docker_app\"}}|\
             {{#each configList}}{{name}}:{{hostDir}}/{{file}}:{{lookup tags \"topic\"}}{{/each}}",
        )
        .unwrap();
        let rendered = renderer
            .render("abc", &test_descriptor(), &test_configs(), "out-block")
            .unwrap();
        assert_eq!(
            rendered,
            "abc|out-block|shop|app:/host/var/lib/docker/containers/abc/abc.log*:app"
        );
    }

    #[test]
    fn test_conditional_emission() {
        let renderer =
            Renderer::new("{{#each configList}}{{#if stdout}}journal{{else}}file{{/if}}{{/each}}")
                .unwrap();
        let rendered = renderer
            .render("abc", &test_descriptor(), &test_configs(), "")
            .unwrap();
        assert_eq!(rendered, "journal");
    }

    #[test]
    fn test_no_html_escaping() {
        let renderer = Renderer::new("{{output}}").unwrap();
        let rendered = renderer
            .render("abc", &test_descriptor(), &[], "a \"quoted\" <block>")
            .unwrap();
        assert_eq!(rendered, "a \"quoted\" <block>");
    }

    #[test]
    fn test_put_if_env_not_empty_set() {
        env::set_var("LOGPILOT_TEST_PUT_SET", "value-1");
        let renderer =
            Renderer::new("{{putIfEnvNotEmpty \"hosts\" \"LOGPILOT_TEST_PUT_SET\"}}").unwrap();
        let rendered = renderer.render("abc", &test_descriptor(), &[], "").unwrap();
        assert_eq!(rendered, "hosts: value-1");
    }

    #[test]
    fn test_put_if_env_not_empty_default() {
        env::remove_var("LOGPILOT_TEST_PUT_UNSET");
        let renderer = Renderer::new(
            "{{putIfEnvNotEmpty \"hosts\" \"LOGPILOT_TEST_PUT_UNSET\" \"fallback\"}}",
        )
        .unwrap();
        let rendered = renderer.render("abc", &test_descriptor(), &[], "").unwrap();
        assert_eq!(rendered, "hosts: fallback");

        let renderer =
            Renderer::new("{{putIfEnvNotEmpty \"hosts\" \"LOGPILOT_TEST_PUT_UNSET\"}}").unwrap();
        let rendered = renderer.render("abc", &test_descriptor(), &[], "").unwrap();
        assert_eq!(rendered, "");
    }

    #[test]
    fn test_put_if_env_not_empty_missing_args() {
        let renderer = Renderer::new("{{putIfEnvNotEmpty \"hosts\"}}").unwrap();
        assert!(renderer.render("abc", &test_descriptor(), &[], "").is_err());
    }

    #[test]
    fn test_env_array() {
        env::set_var("LOGPILOT_TEST_ARRAY", "a, b,c");
        let renderer = Renderer::new("{{envArray \"LOGPILOT_TEST_ARRAY\"}}").unwrap();
        let rendered = renderer.render("abc", &test_descriptor(), &[], "").unwrap();
        assert_eq!(rendered, "[\"a\",\"b\",\"c\"]");
    }

    #[test]
    fn test_env_array_empty() {
        env::remove_var("LOGPILOT_TEST_ARRAY_EMPTY");
        let renderer = Renderer::new("{{envArray \"LOGPILOT_TEST_ARRAY_EMPTY\"}}").unwrap();
        let rendered = renderer.render("abc", &test_descriptor(), &[], "").unwrap();
        assert_eq!(rendered, "[]");
    }
}
