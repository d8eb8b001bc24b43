//! User IDs of an armored OpenPGP key ring
//!
//! A User ID only counts once its binding signature from the primary key
//! verifies. Unsigned or tampered User IDs are dropped; the key itself is
//! still counted so a ring of such keys yields an empty list, not an error.

use pgp::{Deserializable, SignedPublicKey};
use tracing::debug;

use crate::error::IdentityError;

/// Every verified User ID in every key of the ring, in encounter order
///
/// Only the first armor block is read. Duplicate User IDs across keys are
/// kept.
pub fn user_ids(armored: &str) -> Result<Vec<String>, IdentityError> {
    let (keys, _headers) = SignedPublicKey::from_armor_many(armored.as_bytes())
        .map_err(|e| IdentityError::Armor(e.to_string()))?;

    let mut ids = Vec::new();
    let mut count = 0usize;
    for key in keys {
        let key = key.map_err(|e| IdentityError::Packet(e.to_string()))?;
        count += 1;

        for user in &key.details.users {
            match user.verify(&key.primary_key) {
                Ok(()) => ids.push(user.id.id().to_string()),
                Err(e) => debug!(user_id = %user.id.id(), error = %e, "Dropping unverified User ID"),
            }
        }
    }

    if count == 0 {
        return Err(IdentityError::NoKey);
    }
    Ok(ids)
}
