//! The rendering done inside the resource: markup in, SVG image data URL out.
//!
//! SVG is passed through as-is. HTML is embedded in an SVG `foreignObject`
//! sized by the request (or the defaults below). Failures are answered with
//! an `{"error": ...}` object, never a panic, because the response is relayed
//! to the caller unchanged.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};

const DEFAULT_WIDTH: f64 = 800.0;
const DEFAULT_HEIGHT: f64 = 600.0;

pub fn render(message: &Value) -> Value {
    let kind = field_str(message, &["kind", "type"]).unwrap_or("svg");
    let Some(markup) = field_str(message, &["markup", "content"]) else {
        return json!({ "error": "Render request is missing `markup`" });
    };
    let width = message.get("width").and_then(Value::as_f64);
    let height = message.get("height").and_then(Value::as_f64);

    let (svg, width, height) = match kind {
        "svg" => {
            let Some(root) = svg_root(markup) else {
                return json!({ "error": "Markup has no <svg> element" });
            };
            let (w, h) = svg_size(root);
            (
                markup.to_owned(),
                width.or(w).unwrap_or(DEFAULT_WIDTH),
                height.or(h).unwrap_or(DEFAULT_HEIGHT),
            )
        }
        "html" => {
            let width = width.unwrap_or(DEFAULT_WIDTH);
            let height = height.unwrap_or(DEFAULT_HEIGHT);
            let svg = format!(
                r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}"><foreignObject width="100%" height="100%"><div xmlns="http://www.w3.org/1999/xhtml">{markup}</div></foreignObject></svg>"#
            );
            (svg, width, height)
        }
        other => return json!({ "error": format!("Unsupported render kind: {other}") }),
    };

    json!({
        "success": true,
        "mimeType": "image/svg+xml",
        "dataUrl": format!("data:image/svg+xml;base64,{}", STANDARD.encode(svg)),
        "width": width,
        "height": height,
    })
}

fn field_str<'a>(message: &'a Value, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .find_map(|name| message.get(*name).and_then(Value::as_str))
}

/// The opening `<svg ...>` tag, without the angle brackets.
fn svg_root(markup: &str) -> Option<&str> {
    let start = markup.find("<svg")?;
    let rest = &markup[start + 1..];
    let end = rest.find('>')?;
    Some(&rest[..end])
}

fn svg_size(root: &str) -> (Option<f64>, Option<f64>) {
    let width = attribute(root, "width").and_then(leading_number);
    let height = attribute(root, "height").and_then(leading_number);
    if width.is_some() && height.is_some() {
        return (width, height);
    }

    // Fall back to the viewBox extent.
    let view_box: Vec<f64> = attribute(root, "viewBox")
        .map(|v| {
            v.split(|c: char| c.is_whitespace() || c == ',')
                .filter_map(|n| n.parse().ok())
                .collect()
        })
        .unwrap_or_default();
    match view_box.as_slice() {
        [_, _, w, h] => (width.or(Some(*w)), height.or(Some(*h))),
        _ => (width, height),
    }
}

fn attribute<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let mut search = tag;
    while let Some(pos) = search.find(name) {
        let before = search[..pos].chars().next_back();
        let after = search[pos + name.len()..].trim_start();
        if before.is_some_and(char::is_whitespace) {
            if let Some(value) = after.strip_prefix('=') {
                let value = value.trim_start();
                let quote = value.chars().next().filter(|c| *c == '"' || *c == '\'')?;
                let value = &value[1..];
                return value.find(quote).map(|end| &value[..end]);
            }
        }
        search = &search[pos + name.len()..];
    }
    None
}

fn leading_number(raw: &str) -> Option<f64> {
    let end = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(raw.len());
    raw[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(data_url: &Value) -> String {
        let encoded = data_url
            .as_str()
            .unwrap()
            .strip_prefix("data:image/svg+xml;base64,")
            .unwrap();
        String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap()
    }

    #[test]
    fn svg_passes_through_with_its_own_size() {
        let svg = r#"<svg xmlns="http://www.w3.org/2000/svg" width="120px" height="40"><rect/></svg>"#;
        let out = render(&json!({ "kind": "svg", "markup": svg }));
        assert_eq!(out["success"], true);
        assert_eq!(out["width"], 120.0);
        assert_eq!(out["height"], 40.0);
        assert_eq!(decode(&out["dataUrl"]), svg);
    }

    #[test]
    fn svg_size_falls_back_to_view_box() {
        let out = render(&json!({
            "type": "svg",
            "content": r#"<svg viewBox="0 0 300 150"></svg>"#,
        }));
        assert_eq!(out["width"], 300.0);
        assert_eq!(out["height"], 150.0);
    }

    #[test]
    fn stroke_width_is_not_mistaken_for_width() {
        let (w, h) = svg_size(r#"svg stroke-width="9" height="10""#);
        assert_eq!(w, None);
        assert_eq!(h, Some(10.0));
    }

    #[test]
    fn html_is_wrapped_in_foreign_object() {
        let out = render(&json!({
            "kind": "html",
            "markup": "<b>hi</b>",
            "width": 200,
            "height": 100,
        }));
        let svg = decode(&out["dataUrl"]);
        assert!(svg.contains(r#"width="200" height="100""#));
        assert!(svg.contains("<foreignObject"));
        assert!(svg.contains("<b>hi</b>"));
    }

    #[test]
    fn bad_requests_answer_with_error_objects() {
        assert!(render(&json!({ "kind": "svg" }))["error"].is_string());
        assert!(render(&json!({ "kind": "svg", "markup": "<div/>" }))["error"].is_string());
        assert_eq!(
            render(&json!({ "kind": "pdf", "markup": "x" }))["error"],
            "Unsupported render kind: pdf"
        );
    }
}
