/// Work out where the source text of a compiled chunk lives.
///
/// With a `source_path` recorded in the chunk, it is resolved against the
/// chunk's directory. Otherwise the chunk URL itself is mapped from
/// `name.lua.json` (or `name.json`) to `name.lua`.
pub fn resolve_source_url(json_url: &str, source_path: Option<&str>) -> String {
    match source_path {
        Some(path) => {
            match json_url.rfind('/') {
                Some(i) => normalize(&format!("{}/{}", &json_url[..i], path)),
                None => normalize(path),
            }
        }
        None => {
            let stem = json_url
                .strip_suffix(".lua.json")
                .or_else(|| json_url.strip_suffix(".json"))
                .unwrap_or(json_url);
            format!("{}.lua", stem)
        }
    }
}

/// Collapse `.` and `..` segments. A leading `..` that cannot be
/// collapsed is kept.
fn normalize(url: &str) -> String {
    let absolute = url.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();

    for segment in url.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                _ => segments.push(".."),
            },
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}
