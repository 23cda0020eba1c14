//! Minimal `{{ field }}` templates rendered against a JSON context.
//!
//! Fields are dotted paths (`values.rsi`, `analysis.config.candle_period`) and may be
//! piped through `upper`, `lower` or `title`. A path that does not resolve is a
//! [`RenderError::MissingField`].

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use crate::error::RenderError;

static FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*)\s*((?:\|\s*[A-Za-z_]+\s*)*)\}\}")
        .expect("field pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Filter {
    Upper,
    Lower,
    Title,
}

impl Filter {
    fn parse(name: &str) -> Result<Self, RenderError> {
        match name {
            "upper" => Ok(Filter::Upper),
            "lower" => Ok(Filter::Lower),
            "title" => Ok(Filter::Title),
            other => Err(RenderError::UnknownFilter(other.to_owned())),
        }
    }

    fn apply(&self, text: String) -> String {
        match self {
            Filter::Upper => text.to_uppercase(),
            Filter::Lower => text.to_lowercase(),
            Filter::Title => title_case(&text),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Field { path: String, filters: Vec<Filter> },
}

#[derive(Debug, Clone)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, RenderError> {
        let mut segments = Vec::new();
        let mut last = 0;
        for caps in FIELD.captures_iter(source) {
            let (Some(whole), Some(path)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            push_literal(&mut segments, &source[last..whole.start()])?;
            let filters = caps
                .get(2)
                .map(|m| m.as_str())
                .unwrap_or_default()
                .split('|')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(Filter::parse)
                .collect::<Result<Vec<_>, _>>()?;
            segments.push(Segment::Field {
                path: path.as_str().to_owned(),
                filters,
            });
            last = whole.end();
        }
        push_literal(&mut segments, &source[last..])?;
        Ok(Template { segments })
    }

    pub fn render(&self, context: &Value) -> Result<String, RenderError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field { path, filters } => {
                    let value = lookup(context, path)
                        .ok_or_else(|| RenderError::MissingField(path.clone()))?;
                    let text = filters
                        .iter()
                        .fold(to_text(value), |text, filter| filter.apply(text));
                    out.push_str(&text);
                }
            }
        }
        Ok(out)
    }
}

fn push_literal(segments: &mut Vec<Segment>, text: &str) -> Result<(), RenderError> {
    if text.contains("{{") || text.contains("}}") {
        return Err(RenderError::Malformed(format!("unmatched braces in {text:?}")));
    }
    if !text.is_empty() {
        segments.push(Segment::Literal(text.to_owned()));
    }
    Ok(())
}

fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(context, |value, part| match value {
        Value::Object(map) => map.get(part),
        Value::Array(items) => items.get(part.parse::<usize>().ok()?),
        _ => None,
    })
}

fn to_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        other => other.to_string(),
    }
}

pub(crate) fn title_case(text: &str) -> String {
    text.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
