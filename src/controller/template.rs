/*
 *  Copyright (C) 2025 Michael Bachmann
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU Affero General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU Affero General Public License for more details.
 *
 *  You should have received a copy of the GNU Affero General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Config-template rendering, grounded on
//! `effelsberg/servers/cam_server.py::EffController.configure`'s
//! `jinja2.Template(...).render(nodes)` call: a pipeline-config template is
//! substituted against the resolved capture-node list to produce the
//! per-node document handed to the Backend Interface.
//!
//! A minimal mustache subset, not a full jinja2 port: `{{#key}}...{{/key}}`
//! repeats its body once per element of the array at `key`, joined by `,` —
//! enough to expand a capture-node list into a JSON array entry per node.
//! `{{.field}}` inside a section reads a field off the current element;
//! `{{field}}` (no leading dot) always reads the outer context, available
//! both inside and outside sections.

use regex::Regex;
use serde_json::Value;

/// Parses the receiver-selected tag out of a source name: everything after
/// the final `_`, or `"default"` if there is none.
pub fn parse_tag(source_name: &str) -> String {
    match source_name.rsplit_once('_') {
        Some((_, tag)) if !tag.is_empty() => tag.to_owned(),
        _ => "default".to_owned(),
    }
}

/// Renders `template` against `context`, returning the substituted text.
pub fn render(template: &str, context: &Value) -> String {
    let section = Regex::new(r"(?s)\{\{#(\w+)\}\}(.*?)\{\{/\1\}\}").expect("valid section regex");
    let expanded = section.replace_all(template, |caps: &regex::Captures| {
        let key = &caps[1];
        let body = &caps[2];
        match context.get(key).and_then(Value::as_array) {
            Some(items) => items
                .iter()
                .map(|item| substitute(body, context, Some(item)))
                .collect::<Vec<_>>()
                .join(","),
            None => String::new(),
        }
    });
    substitute(&expanded, context, None)
}

/// Renders `template` against `context` and parses the result as JSON.
pub fn render_json(template: &str, context: &Value) -> serde_json::Result<Value> {
    serde_json::from_str(&render(template, context))
}

fn substitute(template: &str, outer: &Value, item: Option<&Value>) -> String {
    let var = Regex::new(r"\{\{(\.?[\w.]*)\}\}").expect("valid variable regex");
    var.replace_all(template, |caps: &regex::Captures| {
        let path = &caps[1];
        let value = match path.strip_prefix('.') {
            Some(rest) => item.and_then(|it| resolve(it, rest)),
            None => resolve(outer, path),
        };
        render_value(value)
    })
    .into_owned()
}

fn resolve<'a>(ctx: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(ctx);
    }
    let mut cur = ctx;
    for part in path.split('.') {
        cur = cur.get(part)?;
    }
    Some(cur)
}

fn render_value(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => serde_json::to_string(s).unwrap_or_default(),
        Some(other) => other.to_string(),
        None => "null".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_tag_takes_everything_after_final_underscore() {
        assert_eq!(parse_tag("J1234+5678_cal"), "cal");
        assert_eq!(parse_tag("J1234+5678_search_fold"), "fold");
    }

    #[test]
    fn parse_tag_defaults_when_no_underscore() {
        assert_eq!(parse_tag("J1234+5678"), "default");
    }

    #[test]
    fn renders_a_section_over_a_node_list() {
        let template = r#"{"nodes":[{{#nodes}}{"ip":"{{.ip}}","port":{{.port}},"pipelines":{{pipelines}}}{{/nodes}}]}"#;
        let context = json!({
            "nodes": [{"ip": "10.0.0.1", "port": 5100}, {"ip": "10.0.0.2", "port": 5100}],
            "pipelines": [{"name": "search", "pipeline_name": "DspsrPipeline"}],
        });
        let rendered = render_json(template, &context).unwrap();
        assert_eq!(rendered["nodes"].as_array().unwrap().len(), 2);
        assert_eq!(rendered["nodes"][0]["ip"], "10.0.0.1");
        assert_eq!(rendered["nodes"][1]["pipelines"][0]["name"], "search");
    }

    #[test]
    fn empty_node_list_renders_empty_array() {
        let template = r#"{"nodes":[{{#nodes}}{"ip":"{{.ip}}"}{{/nodes}}]}"#;
        let context = json!({"nodes": []});
        let rendered = render_json(template, &context).unwrap();
        assert_eq!(rendered["nodes"].as_array().unwrap().len(), 0);
    }
}
