use std::borrow::Cow;

const TOKEN_FIELDS: [&str; 3] = ["\"accessToken\"", "\"refreshToken\"", "\"token\""];

fn is_token_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.' | '~' | '+' | '/' | '=' | '%')
}

/// Masks `token=...` query parameters, e.g. in websocket URLs echoed by
/// connection errors.
pub fn redact_query_token(input: &str) -> Cow<'_, str> {
    const KEY: &str = "token=";
    if !input.contains(KEY) {
        return Cow::Borrowed(input);
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(idx) = rest.find(KEY) {
        out.push_str(&rest[..idx + KEY.len()]);
        rest = &rest[idx + KEY.len()..];

        let consumed: usize = rest
            .chars()
            .take_while(|ch| is_token_char(*ch))
            .map(char::len_utf8)
            .sum();
        out.push_str("REDACTED");
        rest = &rest[consumed..];
    }
    out.push_str(rest);

    if out == input {
        Cow::Borrowed(input)
    } else {
        Cow::Owned(out)
    }
}

fn redact_json_field(text: String, field: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text.as_str();
    while let Some(idx) = rest.find(field) {
        out.push_str(&rest[..idx + field.len()]);
        rest = &rest[idx + field.len()..];

        // Keep `: "` as-is, then mask the string value.
        let prefix: usize = rest
            .chars()
            .take_while(|ch| ch.is_whitespace() || *ch == ':')
            .map(char::len_utf8)
            .sum();
        let after_prefix = &rest[prefix..];
        let Some(value) = after_prefix.strip_prefix('"') else {
            continue;
        };
        out.push_str(&rest[..prefix]);
        out.push('"');
        let consumed = value.find('"').unwrap_or(value.len());
        out.push_str("REDACTED");
        rest = &value[consumed..];
    }
    out.push_str(rest);
    out
}

fn find_ascii_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let hay = haystack.as_bytes();
    let nee = needle.as_bytes();
    if nee.is_empty() {
        return Some(0);
    }
    if nee.len() > hay.len() {
        return None;
    }

    (0..=hay.len() - nee.len()).find(|&i| {
        hay[i..i + nee.len()]
            .iter()
            .zip(nee)
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
    })
}

fn redact_header_value(text: String, header: &str, replacement: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text.as_str();
    loop {
        let Some(idx) = find_ascii_case_insensitive(rest, header) else {
            out.push_str(rest);
            break;
        };
        out.push_str(&rest[..idx]);
        rest = &rest[idx..];

        out.push_str(&rest[..header.len()]);
        rest = &rest[header.len()..];

        if let Some(' ') = rest.chars().next() {
            out.push(' ');
            rest = &rest[1..];
        }

        // Consume until end-of-line.
        let consumed: usize = rest
            .chars()
            .take_while(|ch| *ch != '\n' && *ch != '\r')
            .map(char::len_utf8)
            .sum();
        out.push_str(replacement);
        rest = &rest[consumed..];
    }
    out
}

/// Masks bearer credentials, JSON token fields and `token=` parameters.
pub fn redact_secrets(input: &str) -> Cow<'_, str> {
    let mut value = redact_query_token(input).into_owned();

    value = redact_header_value(value, "Authorization: Bearer", "REDACTED");
    for field in TOKEN_FIELDS {
        if value.contains(field) {
            value = redact_json_field(value, field);
        }
    }

    if value == input {
        Cow::Borrowed(input)
    } else {
        Cow::Owned(value)
    }
}
