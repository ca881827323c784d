use sha2::{Digest, Sha256};

/// Separator between the logical key fields. Spreadsheet cells never carry it.
pub const KEY_DELIMITER: &str = "||";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskIdentity {
    pub task_id: String,
    pub unique_key: String,
}

/// Derives the logical key and its hex SHA-256 digest from the five key fields.
pub fn task_identity(
    contratista: &str,
    ot: &str,
    ut: &str,
    desc_op: &str,
    id_cuadrilla: &str,
) -> TaskIdentity {
    let unique_key = [contratista, ot, ut, desc_op, id_cuadrilla]
        .iter()
        .map(|field| field.trim())
        .collect::<Vec<_>>()
        .join(KEY_DELIMITER);
    let task_id = format!("{:x}", Sha256::digest(unique_key.as_bytes()));
    TaskIdentity {
        task_id,
        unique_key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_stable_and_trim_insensitive() {
        let a = task_identity("ACME", "OT-1", "UT-9", "Poda", "17");
        let b = task_identity(" ACME ", "OT-1\t", "UT-9", " Poda", "17 ");
        assert_eq!(a, b);
        assert_eq!(a.unique_key, "ACME||OT-1||UT-9||Poda||17");
        assert_eq!(a.task_id.len(), 64);
        assert!(a.task_id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn known_digest() {
        let identity = task_identity("a", "b", "c", "d", "e");
        assert_eq!(
            identity.task_id,
            "01a1f134be54b5620540d14132334fd22de808b451c2546f0c4f35cdfe01a193"
        );
    }

    #[test]
    fn different_fields_differ() {
        let a = task_identity("ACME", "OT-1", "UT-9", "Poda", "17");
        let b = task_identity("ACME", "OT-1", "UT-9", "Poda", "18");
        assert_ne!(a.task_id, b.task_id);
    }
}
