//! Profile lookup.

use rusqlite::{params, OptionalExtension};

use parley_shared::UserId;

use crate::database::Database;
use crate::error::Result;
use crate::models::Profile;
use crate::convert::{parse_ts, parse_uuid, ts};

impl Database {
    /// Insert a profile, or overwrite name, email and picture if the id exists.
    pub fn upsert_profile(&self, profile: &Profile) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, name, email, profile_pic, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 email = excluded.email,
                 profile_pic = excluded.profile_pic",
            params![
                profile.id.to_string(),
                profile.name,
                profile.email,
                profile.profile_pic,
                ts(&profile.created_at),
            ],
        )?;
        Ok(())
    }

    /// Fetch a profile by user id.
    pub fn get_profile(&self, id: &UserId) -> Result<Option<Profile>> {
        let profile = self
            .conn()
            .query_row(
                "SELECT id, name, email, profile_pic, created_at
                 FROM users WHERE id = ?1",
                params![id.to_string()],
                row_to_profile,
            )
            .optional()?;
        Ok(profile)
    }
}

fn row_to_profile(row: &rusqlite::Row<'_>) -> rusqlite::Result<Profile> {
    let id_str: String = row.get(0)?;
    let created_str: String = row.get(4)?;

    Ok(Profile {
        id: UserId(parse_uuid(0, &id_str)?),
        name: row.get(1)?,
        email: row.get(2)?,
        profile_pic: row.get(3)?,
        created_at: parse_ts(4, &created_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn profile(name: &str) -> Profile {
        Profile {
            id: UserId::new(),
            name: name.to_string(),
            email: format!("{name}@example.com"),
            profile_pic: String::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn upsert_then_get() {
        let db = Database::open_in_memory().unwrap();
        let mut alice = profile("alice");
        db.upsert_profile(&alice).unwrap();

        let loaded = db.get_profile(&alice.id).unwrap().unwrap();
        assert_eq!(loaded.name, "alice");

        alice.profile_pic = "pics/alice.png".into();
        db.upsert_profile(&alice).unwrap();
        let loaded = db.get_profile(&alice.id).unwrap().unwrap();
        assert_eq!(loaded.profile_pic, "pics/alice.png");
    }

    #[test]
    fn missing_profile_is_none() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_profile(&UserId::new()).unwrap().is_none());
    }
}
