use keygate_common::{Group, HeaderRule, HeaderRuleAction};

pub type Headers = Vec<(String, String)>;

pub fn header_set(headers: &mut Headers, name: impl Into<String>, value: impl Into<String>) {
    let name = name.into();
    let value = value.into();
    let key = name.to_ascii_lowercase();
    if let Some((_, v)) = headers
        .iter_mut()
        .find(|(k, _)| k.to_ascii_lowercase() == key)
    {
        *v = value;
        return;
    }
    headers.push((name, value));
}

pub fn header_get<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    let key = name.to_ascii_lowercase();
    headers
        .iter()
        .find(|(k, _)| k.to_ascii_lowercase() == key)
        .map(|(_, v)| v.as_str())
}

pub fn header_remove(headers: &mut Headers, name: &str) -> Option<String> {
    let key = name.to_ascii_lowercase();
    let idx = headers
        .iter()
        .position(|(k, _)| k.to_ascii_lowercase() == key)?;
    Some(headers.remove(idx).1)
}

/// Apply a group's ordered header rules to an outgoing header set.
///
/// Runs after the channel-native headers so rules can override them. The
/// substitution context is derived from the group and the plaintext key.
pub fn apply_header_rules(
    headers: &mut Headers,
    rules: &[HeaderRule],
    group: &Group,
    api_key: &str,
) {
    for rule in rules {
        match rule.action {
            HeaderRuleAction::Set => {
                let value = substitute(&rule.value, group, api_key);
                header_set(headers, rule.key.clone(), value);
            }
            HeaderRuleAction::Remove => {
                header_remove(headers, &rule.key);
            }
        }
    }
}

/// Expand `${name}` placeholders. Unknown variables expand to the empty
/// string so a typo never leaks the raw template upstream.
fn substitute(template: &str, group: &Group, api_key: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 2..];
        match tail.find('}') {
            Some(end) => {
                match &tail[..end] {
                    "api_key" => out.push_str(api_key),
                    "group_name" => out.push_str(&group.name),
                    "group_id" => out.push_str(&group.id.to_string()),
                    _ => {}
                }
                rest = &tail[end + 1..];
            }
            None => {
                // Unterminated placeholder; keep the literal text.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
