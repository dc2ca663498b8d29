// ── Instance identifiers ──

use rand::Rng;

use crate::error::CoreError;
use crate::store::Artifact;

const ID_LENGTH: usize = 28;

/// Random 28-character lowercase `a`-`z` id from the thread-local CSPRNG.
pub fn generate_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_LENGTH)
        .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
        .collect()
}

/// Ids become file names under the instances directory and the tail of
/// `commands/<id>`, so anything that could escape the directory, collide
/// with another instance's artifacts, or widen into a topic pattern is
/// refused.
pub fn validate_id(id: &str) -> Result<(), CoreError> {
    let reason = if id.is_empty() {
        "empty"
    } else if id.contains(['/', '\\', '\0']) {
        "contains a path separator"
    } else if id.contains("..") || id == "." {
        "contains a relative path component"
    } else if id.contains('*') {
        "contains a topic wildcard"
    } else if id.ends_with(Artifact::Script.suffix()) {
        // `<x>.script` + `.state.json` is `<x>`'s script state file.
        "ends with an artifact suffix"
    } else {
        return Ok(());
    };
    Err(CoreError::InvalidInstanceId {
        id: id.to_owned(),
        reason: reason.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_lowercase_alpha() {
        let id = generate_id();
        assert_eq!(id.len(), ID_LENGTH);
        assert!(id.chars().all(|c| c.is_ascii_lowercase()));
        assert_ne!(id, generate_id());
    }

    #[test]
    fn validation_rejects_path_tricks() {
        assert!(validate_id("aa:bb:cc:dd:ee:ff").is_ok());
        assert!(validate_id(&generate_id()).is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id("../etc").is_err());
        assert!(validate_id("a/b").is_err());
        assert!(validate_id(".").is_err());
    }

    #[test]
    fn validation_rejects_wildcards() {
        assert!(validate_id("*").is_err());
        assert!(validate_id("lamp*").is_err());
    }

    #[test]
    fn validation_rejects_ids_that_alias_other_artifacts() {
        assert!(validate_id("a.script").is_err());
        assert!(validate_id("a.scripted").is_ok());
        assert!(validate_id("v1.2").is_ok());
    }
}
