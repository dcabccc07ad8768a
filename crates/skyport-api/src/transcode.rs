use serde_json::{Map, Value};

/// The legacy `/v0.1/public/codepush/...` routes speak snake_case; the rest
/// of the surface speaks camelCase (spec §6, §9). Rather than keep two
/// wire types per endpoint, both routes share one handler and run requests
/// and responses through this recursive key transcoder.

pub fn camel_to_snake(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(chars.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() {
            let prev_is_lower_or_digit = i > 0 && (chars[i - 1].is_lowercase() || chars[i - 1].is_ascii_digit());
            let next_starts_new_word = i > 0 && chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev_is_lower_or_digit || (next_starts_new_word && chars[i - 1].is_ascii_uppercase()) {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

pub fn snake_to_camel(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut upper_next = false;
    for c in input.chars() {
        if c == '_' {
            upper_next = true;
            continue;
        }
        if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn transcode(value: Value, convert: &impl Fn(&str) -> String) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, v) in map {
                out.insert(convert(&key), transcode(v, convert));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(|v| transcode(v, convert)).collect()),
        other => other,
    }
}

/// Recursively rewrites every object key from camelCase to snake_case.
pub fn to_snake_case(value: Value) -> Value {
    transcode(value, &|k| camel_to_snake(k))
}

/// Recursively rewrites every object key from snake_case to camelCase.
pub fn to_camel_case(value: Value) -> Value {
    transcode(value, &|k| snake_to_camel(k))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn camel_to_snake_converts_words() {
        assert_eq!(camel_to_snake("deploymentKey"), "deployment_key");
        assert_eq!(camel_to_snake("clientUniqueId"), "client_unique_id");
        assert_eq!(camel_to_snake("appVersion"), "app_version");
    }

    #[test]
    fn snake_to_camel_converts_words() {
        assert_eq!(snake_to_camel("deployment_key"), "deploymentKey");
        assert_eq!(snake_to_camel("client_unique_id"), "clientUniqueId");
    }

    #[test]
    fn round_trips_through_both_directions() {
        assert_eq!(snake_to_camel(&camel_to_snake("isMandatory")), "isMandatory");
    }

    #[test]
    fn transcodes_nested_objects_and_arrays() {
        let value = json!({
            "updateInfo": {
                "isAvailable": true,
                "downloadURL": "http://example.com",
            },
            "items": [{"packageHash": "abc"}],
        });
        let snaked = to_snake_case(value);
        assert_eq!(snaked["update_info"]["is_available"], true);
        assert_eq!(snaked["items"][0]["package_hash"], "abc");
    }
}
