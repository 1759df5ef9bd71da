//! Tip entity

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "tips")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub sender_wallet: String,
    pub recipient_wallet: String,
    /// Amount in the token's minor units
    pub amount: i64,
    pub token: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub message: Option<String>,
    /// Content identifier of the uploaded message, empty when none
    pub message_hash: String,
    pub transaction_hash: Option<String>,
    pub status: String,
    pub created_at: DateTimeUtc,
    pub confirmed_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
