//! Identity lookup for merge selection.
//!
//! Resolves free-text operator input to exactly one identity row, refusing
//! ambiguous matches so a merge can never start against a guessed user.

#![allow(clippy::result_large_err)]

use usermerge_core::db::{MergeDatabase, SqlRow, SqlValue};
use usermerge_core::errors::{MergeError, MergeErrorKind, Result};
use usermerge_core::model::Identity;

/// Which attribute to match the operator's input against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchField {
    Id,
    Username,
    ExternalId,
    /// Match against every lookup attribute at once.
    Any,
}

impl SearchField {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "id" => Ok(SearchField::Id),
            "username" => Ok(SearchField::Username),
            "external_id" | "idnumber" => Ok(SearchField::ExternalId),
            "any" | "" => Ok(SearchField::Any),
            other => Err(MergeError::new(MergeErrorKind::InvalidInput)
                .with_op("identity_search")
                .with_message(format!("unknown search field '{}'", other))),
        }
    }
}

const SELECT_COLUMNS: &str = "id, username, idnumber, email, firstname, lastname";

/// Looks identities up in the identity table.
pub struct IdentityResolver {
    table: String,
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self {
            table: "users".to_string(),
        }
    }
}

impl IdentityResolver {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    /// Return every identity matching `input` on `field`, ordered by name.
    pub fn search(
        &self,
        db: &dyn MergeDatabase,
        input: &str,
        field: SearchField,
    ) -> Result<Vec<Identity>> {
        // Non-numeric input can never match an id column.
        let id_param = SqlValue::Integer(input.trim().parse::<i64>().unwrap_or(-1));
        let like_param = SqlValue::Text(format!("%{}%", input.trim()));

        let (where_clause, params): (&str, Vec<SqlValue>) = match field {
            SearchField::Id => ("id = ?", vec![id_param]),
            SearchField::Username => ("username LIKE ?", vec![like_param]),
            SearchField::ExternalId => ("idnumber LIKE ?", vec![like_param]),
            SearchField::Any => (
                "id = ? OR username LIKE ? OR idnumber LIKE ? \
                 OR email LIKE ? OR firstname LIKE ? OR lastname LIKE ?",
                vec![
                    id_param,
                    like_param.clone(),
                    like_param.clone(),
                    like_param.clone(),
                    like_param.clone(),
                    like_param,
                ],
            ),
        };

        let sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY lastname, firstname",
            SELECT_COLUMNS, self.table, where_clause
        );
        let rows = db.query(&sql, &params)?;
        rows.iter().map(row_to_identity).collect()
    }

    /// Resolve to exactly one identity; zero or several matches is a
    /// `NotFound` failure carrying a human-readable reason.
    pub fn find_one(
        &self,
        db: &dyn MergeDatabase,
        input: &str,
        field: SearchField,
    ) -> Result<Identity> {
        let mut matches = self.search(db, input, field)?;
        match matches.len() {
            1 => Ok(matches.remove(0)),
            0 => Err(MergeError::new(MergeErrorKind::NotFound)
                .with_op("identity_search")
                .with_message(format!("no identity matches '{}'", input))),
            n => Err(MergeError::new(MergeErrorKind::NotFound)
                .with_op("identity_search")
                .with_message(format!(
                    "{} identities match '{}'; refine the search",
                    n, input
                ))),
        }
    }

    /// Confirm an already-selected id still exists before merging.
    pub fn verify(&self, db: &dyn MergeDatabase, id: i64) -> Result<Identity> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = ?",
            SELECT_COLUMNS, self.table
        );
        let rows = db.query(&sql, &[SqlValue::Integer(id)])?;
        match rows.first() {
            Some(row) => row_to_identity(row),
            None => Err(MergeError::new(MergeErrorKind::NotFound)
                .with_op("identity_verify")
                .with_message(format!("identity {} does not exist", id))),
        }
    }
}

fn row_to_identity(row: &SqlRow) -> Result<Identity> {
    if row.len() < 6 {
        return Err(MergeError::new(MergeErrorKind::Serialization)
            .with_op("row_decode")
            .with_message(format!("identity row has {} columns, expected 6", row.len())));
    }
    Ok(Identity {
        id: row[0].as_i64()?,
        username: row[1].as_str()?.to_string(),
        external_id: optional_text(&row[2]),
        email: optional_text(&row[3]),
        firstname: optional_text(&row[4]),
        lastname: optional_text(&row[5]),
    })
}

fn optional_text(v: &SqlValue) -> Option<String> {
    match v {
        SqlValue::Text(s) => Some(s.clone()),
        _ => None,
    }
}
