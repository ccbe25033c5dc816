//! Per-shard endpoint templates.
//!
//! A template such as `https://bucket-%d.s3.example.com` or `/data/shard-%02d`
//! carries exactly one index placeholder, expanded once per shard.

use std::collections::HashSet;

use objshard_store::{StoreError, StoreResult};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Index { width: usize, zero_pad: bool },
}

fn template_error(template: &str, reason: impl Into<String>) -> StoreError {
    StoreError::EndpointTemplate {
        template: template.to_string(),
        reason: reason.into(),
    }
}

fn parse(template: &str) -> StoreResult<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            literal.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            literal.push('%');
            continue;
        }
        let zero_pad = chars.peek() == Some(&'0');
        if zero_pad {
            chars.next();
        }
        let mut width = String::new();
        while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
            width.push(*d);
            chars.next();
        }
        match chars.next() {
            Some('d') => {}
            Some(other) => {
                return Err(template_error(template, format!("unsupported verb %{other}")));
            }
            None => return Err(template_error(template, "dangling %")),
        }
        let width = if width.is_empty() {
            0
        } else {
            width
                .parse()
                .map_err(|_| template_error(template, "invalid width"))?
        };
        if !literal.is_empty() {
            segments.push(Segment::Literal(std::mem::take(&mut literal)));
        }
        segments.push(Segment::Index { width, zero_pad });
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

fn render(segments: &[Segment], index: usize) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Literal(s) => out.push_str(s),
            Segment::Index { width, zero_pad: true } => {
                out.push_str(&format!("{index:0width$}", width = *width))
            }
            Segment::Index { width, zero_pad: false } => {
                out.push_str(&format!("{index:width$}", width = *width))
            }
        }
    }
    out
}

/// Expand `template` into one endpoint per shard index in `0..shard_count`.
///
/// Fails unless the template holds exactly one index placeholder and every
/// expansion is non-empty and distinct. Expansions are used verbatim, so one
/// with leading or trailing whitespace is rejected rather than trimmed.
pub fn expand_endpoints(template: &str, shard_count: usize) -> StoreResult<Vec<String>> {
    if shard_count == 0 {
        return Err(StoreError::Config("shard count must be at least 1".to_string()));
    }
    let segments = parse(template)?;
    let placeholders = segments
        .iter()
        .filter(|s| matches!(s, Segment::Index { .. }))
        .count();
    match placeholders {
        0 => return Err(template_error(template, "no shard index placeholder (%d)")),
        1 => {}
        n => return Err(template_error(template, format!("{n} index placeholders, expected one"))),
    }

    let endpoints: Vec<String> = (0..shard_count).map(|i| render(&segments, i)).collect();
    let mut seen = HashSet::with_capacity(endpoints.len());
    for endpoint in &endpoints {
        if endpoint.is_empty() {
            return Err(template_error(template, "expands to an empty endpoint"));
        }
        if endpoint.trim() != endpoint {
            return Err(template_error(
                template,
                format!("endpoint {endpoint:?} has leading or trailing whitespace"),
            ));
        }
        if !seen.insert(endpoint.as_str()) {
            return Err(template_error(template, format!("endpoint {endpoint:?} repeats")));
        }
    }
    Ok(endpoints)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_plain_index() {
        let eps = expand_endpoints("https://bucket-%d.example.com", 3).unwrap();
        assert_eq!(
            eps,
            vec![
                "https://bucket-0.example.com",
                "https://bucket-1.example.com",
                "https://bucket-2.example.com",
            ]
        );
    }

    #[test]
    fn expands_zero_padded_index_and_literal_percent() {
        let eps = expand_endpoints("/data/100%%/shard-%03d", 2).unwrap();
        assert_eq!(eps, vec!["/data/100%/shard-000", "/data/100%/shard-001"]);
    }

    #[test]
    fn rejects_template_without_placeholder() {
        let err = expand_endpoints("https://bucket.example.com", 3).unwrap_err();
        assert!(matches!(err, StoreError::EndpointTemplate { .. }));
    }

    #[test]
    fn rejects_multiple_placeholders() {
        assert!(expand_endpoints("%d-%d", 2).is_err());
    }

    #[test]
    fn rejects_unknown_verb_and_dangling_percent() {
        let err = expand_endpoints("bucket-%s", 2).unwrap_err();
        assert!(err.to_string().contains("%s"));
        assert!(expand_endpoints("bucket-%", 2).is_err());
    }

    #[test]
    fn surrounding_whitespace_is_rejected_not_trimmed() {
        for template in [" b-%d", "b-%d ", "b-%d\n", "%3d"] {
            let err = expand_endpoints(template, 2).unwrap_err();
            assert!(err.to_string().contains("whitespace"), "{template:?}: {err}");
        }
        let eps = expand_endpoints("b-%3d", 2).unwrap();
        assert_eq!(eps, vec!["b-  0", "b-  1"]);
    }

    #[test]
    fn rejects_zero_shards() {
        assert!(matches!(
            expand_endpoints("b-%d", 0).unwrap_err(),
            StoreError::Config(_)
        ));
    }

    #[test]
    fn single_shard_is_fine() {
        assert_eq!(expand_endpoints("mem://s%d", 1).unwrap(), vec!["mem://s0"]);
    }
}
