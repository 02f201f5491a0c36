use rusqlite::{params, Connection, OptionalExtension};

use crate::services::persistence::{BookingRecord, SortOrder};

// ── Bookings ──

const BOOKING_COLUMNS: &str = "id, user_id, customer_name, customer_phone, customer_address, booking_type, \
     service_id, plan_id, purchase_brands, purchase_tonnage, purchase_budget, date, time, status, ac_type, \
     notes, created_at, updated_at, revision";

pub fn insert_booking(conn: &Connection, record: &BookingRecord) -> anyhow::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO bookings ({BOOKING_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)"
        ),
        params![
            record.id,
            record.user_id,
            record.customer_name,
            record.customer_phone,
            record.customer_address,
            record.booking_type,
            record.service_id,
            record.plan_id,
            record.purchase_brands,
            record.purchase_tonnage,
            record.purchase_budget,
            record.date,
            record.time,
            record.status,
            record.ac_type,
            record.notes,
            record.created_at,
            record.updated_at,
            record.revision,
        ],
    )?;
    Ok(())
}

pub fn get_booking(conn: &Connection, id: &str) -> anyhow::Result<Option<BookingRecord>> {
    let record = conn
        .query_row(
            &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1"),
            params![id],
            parse_booking_row,
        )
        .optional()?;
    Ok(record)
}

/// Lists bookings, optionally restricted to one owner.
pub fn list_bookings(
    conn: &Connection,
    user_id: Option<&str>,
    order: SortOrder,
) -> anyhow::Result<Vec<BookingRecord>> {
    let direction = match order {
        SortOrder::NewestFirst => "DESC",
        SortOrder::OldestFirst => "ASC",
    };

    let mut bookings = vec![];
    match user_id {
        Some(user_id) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings WHERE user_id = ?1
                 ORDER BY created_at {direction}, rowid {direction}"
            ))?;
            let rows = stmt.query_map(params![user_id], parse_booking_row)?;
            for row in rows {
                bookings.push(row?);
            }
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings
                 ORDER BY created_at {direction}, rowid {direction}"
            ))?;
            let rows = stmt.query_map([], parse_booking_row)?;
            for row in rows {
                bookings.push(row?);
            }
        }
    }
    Ok(bookings)
}

/// Sets the status only if the row still holds `expected`. Returns whether a
/// row was written.
pub fn update_booking_status(
    conn: &Connection,
    id: &str,
    expected: &str,
    status: &str,
    updated_at: &str,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET status = ?1, updated_at = ?2, revision = revision + 1
         WHERE id = ?3 AND status = ?4",
        params![status, updated_at, id, expected],
    )?;
    Ok(count > 0)
}

fn parse_booking_row(row: &rusqlite::Row) -> rusqlite::Result<BookingRecord> {
    Ok(BookingRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        customer_name: row.get(2)?,
        customer_phone: row.get(3)?,
        customer_address: row.get(4)?,
        booking_type: row.get(5)?,
        service_id: row.get(6)?,
        plan_id: row.get(7)?,
        purchase_brands: row.get(8)?,
        purchase_tonnage: row.get(9)?,
        purchase_budget: row.get(10)?,
        date: row.get(11)?,
        time: row.get(12)?,
        status: row.get(13)?,
        ac_type: row.get(14)?,
        notes: row.get(15)?,
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
        revision: row.get(18)?,
    })
}

// ── Users ──

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub phone: Option<String>,
    pub role: String,
}

const USER_COLUMNS: &str = "id, name, email, password_hash, phone, role";

fn parse_user_row(row: &rusqlite::Row) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        phone: row.get(4)?,
        role: row.get(5)?,
    })
}

pub fn insert_user(conn: &Connection, user: &UserRow) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO users (id, name, email, password_hash, phone, role)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            user.id,
            user.name,
            user.email,
            user.password_hash,
            user.phone,
            user.role,
        ],
    )?;
    Ok(())
}

pub fn get_user_by_email(conn: &Connection, email: &str) -> anyhow::Result<Option<UserRow>> {
    let user = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
            params![email],
            parse_user_row,
        )
        .optional()?;
    Ok(user)
}

pub fn get_user_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<UserRow>> {
    let user = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id],
            parse_user_row,
        )
        .optional()?;
    Ok(user)
}

pub fn set_reset_token(
    conn: &Connection,
    user_id: &str,
    token_hash: &str,
    expires_at: &str,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE users SET reset_token_hash = ?1, reset_expires_at = ?2, updated_at = datetime('now')
         WHERE id = ?3",
        params![token_hash, expires_at, user_id],
    )?;
    Ok(())
}

pub fn clear_reset_token(conn: &Connection, user_id: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE users SET reset_token_hash = NULL, reset_expires_at = NULL WHERE id = ?1",
        params![user_id],
    )?;
    Ok(())
}

/// Finds the user holding an unexpired reset token digest.
pub fn get_user_by_reset_token(
    conn: &Connection,
    token_hash: &str,
    now: &str,
) -> anyhow::Result<Option<UserRow>> {
    let user = conn
        .query_row(
            &format!(
                "SELECT {USER_COLUMNS} FROM users
                 WHERE reset_token_hash = ?1 AND reset_expires_at > ?2"
            ),
            params![token_hash, now],
            parse_user_row,
        )
        .optional()?;
    Ok(user)
}

/// Replaces the password hash and consumes any pending reset token.
pub fn update_password(conn: &Connection, user_id: &str, password_hash: &str) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE users SET password_hash = ?1, reset_token_hash = NULL, reset_expires_at = NULL,
                updated_at = datetime('now')
         WHERE id = ?2",
        params![password_hash, user_id],
    )?;
    Ok(count > 0)
}

pub fn update_role(conn: &Connection, email: &str, role: &str) -> anyhow::Result<Option<UserRow>> {
    let count = conn.execute(
        "UPDATE users SET role = ?1, updated_at = datetime('now') WHERE email = ?2",
        params![role, email],
    )?;
    if count == 0 {
        return Ok(None);
    }
    get_user_by_email(conn, email)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn record(id: &str, user_id: Option<&str>, created_at: &str) -> BookingRecord {
        BookingRecord {
            id: id.to_string(),
            user_id: user_id.map(str::to_string),
            customer_name: "Bob".to_string(),
            customer_phone: "9876543210".to_string(),
            customer_address: "Sector 45".to_string(),
            booking_type: "SERVICE".to_string(),
            service_id: Some("repair".to_string()),
            plan_id: None,
            purchase_brands: None,
            purchase_tonnage: None,
            purchase_budget: None,
            date: Some("2025-07-01".to_string()),
            time: Some("10:00 AM".to_string()),
            status: "Pending".to_string(),
            ac_type: "Split".to_string(),
            notes: None,
            created_at: created_at.to_string(),
            updated_at: created_at.to_string(),
            revision: 1,
        }
    }

    #[test]
    fn test_list_bookings_order_and_filter() {
        let conn = db::init_db(":memory:").unwrap();
        insert_booking(&conn, &record("bk_1", Some("u_1"), "2025-07-01T10:00:00.000000Z")).unwrap();
        insert_booking(&conn, &record("bk_2", Some("u_2"), "2025-07-02T10:00:00.000000Z")).unwrap();
        insert_booking(&conn, &record("bk_3", Some("u_1"), "2025-07-03T10:00:00.000000Z")).unwrap();

        let all = list_bookings(&conn, None, SortOrder::NewestFirst).unwrap();
        let ids: Vec<_> = all.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["bk_3", "bk_2", "bk_1"]);

        let mine = list_bookings(&conn, Some("u_1"), SortOrder::OldestFirst).unwrap();
        let ids: Vec<_> = mine.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["bk_1", "bk_3"]);
    }

    #[test]
    fn test_update_status_requires_expected() {
        let conn = db::init_db(":memory:").unwrap();
        insert_booking(&conn, &record("bk_1", None, "2025-07-01T10:00:00.000000Z")).unwrap();

        assert!(!update_booking_status(&conn, "bk_1", "Confirmed", "Completed", "2025-07-02T00:00:00.000000Z").unwrap());
        assert!(update_booking_status(&conn, "bk_1", "Pending", "Confirmed", "2025-07-02T00:00:00.000000Z").unwrap());

        let stored = get_booking(&conn, "bk_1").unwrap().unwrap();
        assert_eq!(stored.status, "Confirmed");
        assert_eq!(stored.revision, 2);
        assert!(get_booking(&conn, "missing").unwrap().is_none());
    }

    #[test]
    fn test_reset_token_expiry() {
        let conn = db::init_db(":memory:").unwrap();
        let user = UserRow {
            id: "u_1".to_string(),
            name: "Demo".to_string(),
            email: "user@gmail.com".to_string(),
            password_hash: "x".to_string(),
            phone: None,
            role: "CUSTOMER".to_string(),
        };
        insert_user(&conn, &user).unwrap();
        set_reset_token(&conn, "u_1", "digest", "2025-01-01T00:10:00.000000Z").unwrap();

        assert!(get_user_by_reset_token(&conn, "digest", "2025-01-01T00:05:00.000000Z").unwrap().is_some());
        assert!(get_user_by_reset_token(&conn, "digest", "2025-01-01T00:15:00.000000Z").unwrap().is_none());

        update_password(&conn, "u_1", "y").unwrap();
        assert!(get_user_by_reset_token(&conn, "digest", "2025-01-01T00:05:00.000000Z").unwrap().is_none());
    }
}
