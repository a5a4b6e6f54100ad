use std::collections::HashMap;
use std::path::PathBuf;

/// One import root: files found below `path` are tagged with `source_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRoot {
    pub source_id: String,
    pub path: PathBuf,
}

/// Per-user path visibility. Without a configured policy every caller is
/// unrestricted; with one, unknown users see nothing.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    users: Option<HashMap<String, Vec<String>>>,
}

impl AccessPolicy {
    pub fn unrestricted() -> Self {
        Self { users: None }
    }

    /// Blank roots are rejected: a typo must not read as "everything".
    pub fn from_json(raw: &str) -> Result<Self, String> {
        let users: HashMap<String, Vec<String>> =
            serde_json::from_str(raw).map_err(|e| e.to_string())?;
        for (user, roots) in &users {
            if roots
                .iter()
                .any(|root| crate::domain::normalize_scope(root.trim()).is_empty())
            {
                return Err(format!("blank path in allow-list for user {:?}", user));
            }
        }
        Ok(Self { users: Some(users) })
    }

    pub fn allowed_paths(&self, user_id: Option<&str>) -> Option<Vec<String>> {
        let users = self.users.as_ref()?;
        Some(
            user_id
                .and_then(|u| users.get(u))
                .cloned()
                .unwrap_or_default(),
        )
    }

    /// Same visibility rule the query engine applies, for single paths.
    pub fn permits(&self, user_id: Option<&str>, path: &str) -> bool {
        match self.allowed_paths(user_id) {
            None => true,
            Some(roots) => roots.iter().any(|root| {
                let root = crate::domain::normalize_scope(root);
                !root.is_empty()
                    && (path == root
                        || path
                            .strip_prefix(root)
                            .map(|rest| root.ends_with('/') || rest.starts_with('/'))
                            .unwrap_or(false))
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub snapshot_path: PathBuf,
    pub port: u16,
    pub roots: Vec<MediaRoot>,
    pub access: AccessPolicy,
    pub follow_links: bool,
}

/// Parses `id=path,id2=path2`. A bare path uses its own text as the id.
pub fn parse_roots(raw: &str) -> Vec<MediaRoot> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|item| match item.split_once('=') {
            Some((id, path)) => MediaRoot {
                source_id: id.trim().to_string(),
                path: PathBuf::from(path.trim()),
            },
            None => MediaRoot {
                source_id: item.to_string(),
                path: PathBuf::from(item),
            },
        })
        .collect()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, String> {
        let snapshot_path =
            PathBuf::from(std::env::var("SNAPSHOT_PATH").unwrap_or_else(|_| "catalog.db".to_string()));
        let port = match std::env::var("PORT") {
            Ok(p) => p.parse().map_err(|e| format!("invalid PORT {:?}: {}", p, e))?,
            Err(_) => 3000,
        };
        let roots = std::env::var("MEDIA_ROOTS")
            .map(|r| parse_roots(&r))
            .unwrap_or_default();
        let access = match std::env::var("ACCESS_POLICY") {
            Ok(raw) if !raw.trim().is_empty() => AccessPolicy::from_json(&raw)
                .map_err(|e| format!("invalid ACCESS_POLICY: {}", e))?,
            _ => AccessPolicy::unrestricted(),
        };
        let follow_links = std::env::var("FOLLOW_SYMLINKS")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Ok(Self {
            snapshot_path,
            port,
            roots,
            access,
            follow_links,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roots() {
        let roots = parse_roots("photos=/srv/photos, /mnt/usb ,,music = /srv/music");
        assert_eq!(
            roots,
            vec![
                MediaRoot {
                    source_id: "photos".to_string(),
                    path: PathBuf::from("/srv/photos")
                },
                MediaRoot {
                    source_id: "/mnt/usb".to_string(),
                    path: PathBuf::from("/mnt/usb")
                },
                MediaRoot {
                    source_id: "music".to_string(),
                    path: PathBuf::from("/srv/music")
                },
            ]
        );
    }

    #[test]
    fn test_access_policy() {
        let open = AccessPolicy::unrestricted();
        assert_eq!(open.allowed_paths(Some("anyone")), None);
        assert!(open.permits(None, "/x/y.jpg"));

        let policy = AccessPolicy::from_json(r#"{"alice": ["/srv/alice"], "locked": []}"#).unwrap();
        assert_eq!(
            policy.allowed_paths(Some("alice")),
            Some(vec!["/srv/alice".to_string()])
        );
        assert_eq!(policy.allowed_paths(Some("mallory")), Some(vec![]));
        assert_eq!(policy.allowed_paths(None), Some(vec![]));

        assert!(policy.permits(Some("alice"), "/srv/alice/a.jpg"));
        assert!(policy.permits(Some("alice"), "/srv/alice"));
        assert!(!policy.permits(Some("alice"), "/srv/alice2/a.jpg"));
        assert!(!policy.permits(Some("locked"), "/srv/alice/a.jpg"));
    }

    #[test]
    fn test_blank_allow_list_root_is_rejected() {
        assert!(AccessPolicy::from_json(r#"{"alice": [""]}"#).is_err());
        assert!(AccessPolicy::from_json(r#"{"alice": ["/srv/a", " "]}"#).is_err());
        assert!(AccessPolicy::from_json(r#"{"alice": ["/"]}"#).is_ok());
        assert!(AccessPolicy::from_json("not json").is_err());
    }
}
