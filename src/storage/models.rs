use crate::storage::schema::{devices, link_codes, tutor_child_links, users};
use chrono::NaiveDateTime;
use diesel::prelude::*;

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub role: String,
    pub password_hash: String,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = users)]
pub struct NewUser<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub role: &'a str,
    pub password_hash: &'a str,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = link_codes)]
#[diesel(belongs_to(User, foreign_key = tutor_id))]
pub struct LinkCode {
    pub id: i32,
    pub code: String,
    pub tutor_id: i32,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub used: bool,
    pub child_id: Option<i32>,
}

#[derive(Insertable)]
#[diesel(table_name = link_codes)]
pub struct NewLinkCode<'a> {
    pub code: &'a str,
    pub tutor_id: i32,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = tutor_child_links)]
pub struct TutorChildLink {
    pub id: i32,
    pub tutor_id: i32,
    pub child_id: i32,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = tutor_child_links)]
pub struct NewTutorChildLink {
    pub tutor_id: i32,
    pub child_id: i32,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = devices)]
#[diesel(belongs_to(User, foreign_key = user_id))]
pub struct Device {
    pub id: i32,
    pub uuid: String,
    pub name: String,
    pub model: String,
    pub os_version: String,
    pub last_sync: NaiveDateTime,
    pub user_id: i32,
}

#[derive(Insertable)]
#[diesel(table_name = devices)]
pub struct NewDevice<'a> {
    pub uuid: &'a str,
    pub name: &'a str,
    pub model: &'a str,
    pub os_version: &'a str,
    pub last_sync: NaiveDateTime,
    pub user_id: i32,
}
