use apnasquad_types::{api::Page, AccountPatch, Amount, ProfilePatch, Role, User};
use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension};

use super::{column_amount, column_enum, column_time, immediate, now_ms, Store, StoreError};
use crate::ids;

const USER_COLUMNS: &str = "id, name, email, password_hash, bgmi_id, phone, upi_id, upi_name, \
     team_name, avatar, file_id, role, balance, bonus, referral_code, referred_by, refresh_token, \
     created_at, updated_at";

/// Referral code collisions are retried this many times before giving up.
const REFERRAL_CODE_ATTEMPTS: usize = 5;

/// An account created from a verified signup.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub referred_by: Option<String>,
    /// Credited to the referrer's bonus balance.
    pub referral_bonus: Amount,
}

/// Exact-match filters for the admin user listing.
#[derive(Clone, Debug, Default)]
pub struct UserFilter {
    pub id: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub bgmi_id: Option<String>,
    pub role: Option<Role>,
}

pub(crate) fn map_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        name: row.get("name")?,
        email: row.get("email")?,
        password_hash: row.get("password_hash")?,
        bgmi_id: row.get("bgmi_id")?,
        phone: row.get("phone")?,
        upi_id: row.get("upi_id")?,
        upi_name: row.get("upi_name")?,
        team_name: row.get("team_name")?,
        avatar: row.get("avatar")?,
        file_id: row.get("file_id")?,
        role: column_enum(row, "role")?,
        balance: column_amount(row, "balance")?,
        bonus: column_amount(row, "bonus")?,
        referral_code: row.get("referral_code")?,
        referred_by: row.get("referred_by")?,
        refresh_token: row.get("refresh_token")?,
        created_at: column_time(row, "created_at")?,
        updated_at: column_time(row, "updated_at")?,
    })
}

pub(crate) fn find_by_id(conn: &Connection, id: &str) -> Result<Option<User>, StoreError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
    Ok(conn.query_row(&sql, [id], map_user).optional()?)
}

fn find_by_column(conn: &Connection, column: &str, value: &str) -> Result<Option<User>, StoreError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?");
    Ok(conn.query_row(&sql, [value], map_user).optional()?)
}

/// Inserts the account and credits the referrer inside one transaction.
/// Returns `None` when the email is already registered.
fn create(conn: &mut Connection, new: NewUser) -> Result<Option<User>, StoreError> {
    immediate(conn, |tx| {
        let taken: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?)",
            [&new.email],
            |row| row.get(0),
        )?;
        if taken {
            return Ok(None);
        }

        let mut referred_by = new.referred_by.clone();
        if let Some(referrer) = referred_by.as_deref() {
            let credited = tx.execute(
                "UPDATE users SET bonus = bonus + ?, updated_at = ? WHERE id = ?",
                params![new.referral_bonus.paise(), now_ms(), referrer],
            )?;
            if credited == 0 {
                tracing::warn!(referrer, "referrer vanished before signup completed");
                referred_by = None;
            }
        }

        let id = ids::new_id();
        let now = now_ms();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let inserted = tx.execute(
                "INSERT INTO users (id, name, email, password_hash, role, balance, bonus, \
                 referral_code, referred_by, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, 0, 0, ?, ?, ?, ?)",
                params![
                    id,
                    new.name,
                    new.email,
                    new.password_hash,
                    Role::User.as_str(),
                    ids::referral_code(),
                    referred_by,
                    now,
                    now
                ],
            );
            match inserted.map_err(StoreError::from) {
                Ok(_) => break,
                Err(err) if err.is_constraint() && attempts < REFERRAL_CODE_ATTEMPTS => continue,
                Err(err) => return Err(err),
            }
        }
        find_by_id(tx, &id)
    })
}

fn list(conn: &Connection, filter: &UserFilter, page: Page) -> Result<(Vec<User>, u64), StoreError> {
    let mut clauses = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    let mut push = |column: &str, value: Option<String>| {
        if let Some(value) = value {
            clauses.push(format!("{column} = ?"));
            values.push(Value::Text(value));
        }
    };
    push("id", filter.id.clone());
    push("email", filter.email.clone());
    push("phone", filter.phone.clone());
    push("bgmi_id", filter.bgmi_id.clone());
    push("role", filter.role.map(|role| role.as_str().to_string()));
    let filter_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM users {filter_sql}"),
        params_from_iter(values.iter()),
        |row| row.get(0),
    )?;

    values.push(Value::Integer(page.limit as i64));
    values.push(Value::Integer(page.offset() as i64));
    let mut stmt = conn.prepare(&format!(
        "SELECT {USER_COLUMNS} FROM users {filter_sql} ORDER BY created_at ASC LIMIT ? OFFSET ?"
    ))?;
    let users = stmt
        .query_map(params_from_iter(values.iter()), map_user)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok((users, total.max(0) as u64))
}

fn write_profile(tx: &rusqlite::Transaction<'_>, user: &User) -> Result<(), StoreError> {
    tx.execute(
        "UPDATE users SET name = ?, bgmi_id = ?, phone = ?, upi_id = ?, upi_name = ?, \
         team_name = ?, avatar = ?, file_id = ?, updated_at = ? WHERE id = ?",
        params![
            user.name,
            user.bgmi_id,
            user.phone,
            user.upi_id,
            user.upi_name,
            user.team_name,
            user.avatar,
            user.file_id,
            now_ms(),
            user.id
        ],
    )?;
    Ok(())
}

/// Removes the account from every team it plays in. A team that loses its
/// captain passes the role to its earliest remaining player; a team left
/// empty is dropped and its tournament spot released. Ledger rows stay.
fn delete(conn: &mut Connection, id: &str) -> Result<bool, StoreError> {
    immediate(conn, |tx| {
        if find_by_id(tx, id)?.is_none() {
            return Ok(false);
        }
        let memberships = {
            let mut stmt = tx.prepare(
                "SELECT registration_id, tournament_id, is_captain FROM registration_players \
                 WHERE user_id = ?",
            )?;
            let rows = stmt
                .query_map([id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, bool>(2)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        tx.execute("DELETE FROM registration_players WHERE user_id = ?", [id])?;

        let now = now_ms();
        for (registration_id, tournament_id, was_captain) in memberships {
            let remaining: i64 = tx.query_row(
                "SELECT COUNT(*) FROM registration_players WHERE registration_id = ?",
                [&registration_id],
                |row| row.get(0),
            )?;
            if remaining == 0 {
                tx.execute("DELETE FROM registrations WHERE id = ?", [&registration_id])?;
                tx.execute(
                    "UPDATE tournaments SET joined_spots = joined_spots - 1, updated_at = ? \
                     WHERE id = ? AND joined_spots > 0",
                    params![now, tournament_id],
                )?;
            } else if was_captain {
                tx.execute(
                    "UPDATE registration_players SET is_captain = 1 WHERE rowid = ( \
                     SELECT rowid FROM registration_players WHERE registration_id = ? \
                     ORDER BY joined_at ASC, rowid ASC LIMIT 1)",
                    [&registration_id],
                )?;
                tx.execute(
                    "UPDATE registrations SET updated_at = ? WHERE id = ?",
                    params![now, registration_id],
                )?;
            }
        }
        tx.execute("DELETE FROM users WHERE id = ?", [id])?;
        Ok(true)
    })
}

impl Store {
    pub async fn find_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        let id = id.to_string();
        self.call(move |conn| find_by_id(conn, &id)).await
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let email = email.to_string();
        self.call(move |conn| find_by_column(conn, "email", &email))
            .await
    }

    pub async fn find_user_by_referral_code(&self, code: &str) -> Result<Option<User>, StoreError> {
        let code = code.to_string();
        self.call(move |conn| find_by_column(conn, "referral_code", &code))
            .await
    }

    pub async fn create_user(&self, new: NewUser) -> Result<Option<User>, StoreError> {
        self.call(move |conn| create(conn, new)).await
    }

    pub async fn set_refresh_token(
        &self,
        id: &str,
        token: Option<String>,
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        self.call(move |conn| {
            conn.execute(
                "UPDATE users SET refresh_token = ?, updated_at = ? WHERE id = ?",
                params![token, now_ms(), id],
            )?;
            Ok(())
        })
        .await
    }

    /// Replaces the password hash and signs the account out everywhere.
    /// Returns false when no account has this email.
    pub async fn set_password(&self, email: &str, password_hash: String) -> Result<bool, StoreError> {
        let email = email.to_string();
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE users SET password_hash = ?, refresh_token = NULL, updated_at = ? \
                 WHERE email = ?",
                params![password_hash, now_ms(), email],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    pub async fn update_profile(
        &self,
        id: &str,
        patch: ProfilePatch,
    ) -> Result<Option<User>, StoreError> {
        let id = id.to_string();
        self.call(move |conn| {
            immediate(conn, |tx| {
                let Some(mut user) = find_by_id(tx, &id)? else {
                    return Ok(None);
                };
                patch.apply(&mut user);
                write_profile(tx, &user)?;
                find_by_id(tx, &id)
            })
        })
        .await
    }

    pub async fn update_account(
        &self,
        id: &str,
        patch: AccountPatch,
    ) -> Result<Option<User>, StoreError> {
        let id = id.to_string();
        self.call(move |conn| {
            immediate(conn, |tx| {
                let Some(mut user) = find_by_id(tx, &id)? else {
                    return Ok(None);
                };
                patch.apply(&mut user);
                write_profile(tx, &user)?;
                tx.execute(
                    "UPDATE users SET role = ?, balance = ?, bonus = ? WHERE id = ?",
                    params![
                        user.role.as_str(),
                        user.balance.paise(),
                        user.bonus.paise(),
                        id
                    ],
                )?;
                find_by_id(tx, &id)
            })
        })
        .await
    }

    pub async fn delete_user(&self, id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        self.call(move |conn| delete(conn, &id)).await
    }

    pub async fn list_users(
        &self,
        filter: UserFilter,
        page: Page,
    ) -> Result<(Vec<User>, u64), StoreError> {
        self.call(move |conn| list(conn, &filter, page)).await
    }
}
