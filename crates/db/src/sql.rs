//! SQL implementation of the tip store (TiDB/MySQL via sea-orm)

use crate::entity::tip;
use crate::{NewTip, TipRecord, TipStatus, TipStore};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use breaker::CircuitBreaker;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Database, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

const OPEN_STATUSES: [&str; 2] = ["PENDING", "SUBMITTED"];

pub struct SqlTipStore {
    conn: DatabaseConnection,
    breaker: CircuitBreaker,
}

impl SqlTipStore {
    pub async fn connect(database_url: &str, breaker: CircuitBreaker) -> Result<Self> {
        let conn = Database::connect(database_url)
            .await
            .context("Failed to connect to database")?;
        info!("Connected to tip database");
        Ok(Self { conn, breaker })
    }

    pub fn with_connection(conn: DatabaseConnection, breaker: CircuitBreaker) -> Self {
        Self { conn, breaker }
    }
}

fn to_record(model: tip::Model) -> Result<TipRecord> {
    Ok(TipRecord {
        status: TipStatus::from_str(&model.status)?,
        id: model.id,
        sender_id: model.sender_id,
        recipient_id: model.recipient_id,
        sender_wallet: model.sender_wallet,
        recipient_wallet: model.recipient_wallet,
        amount: model.amount,
        token: model.token,
        message: model.message,
        message_hash: model.message_hash,
        transaction_hash: model.transaction_hash,
        created_at: model.created_at,
        confirmed_at: model.confirmed_at,
    })
}

#[async_trait]
impl TipStore for SqlTipStore {
    async fn insert(&self, new_tip: NewTip) -> Result<TipRecord> {
        let model = tip::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            sender_id: Set(new_tip.sender_id),
            recipient_id: Set(new_tip.recipient_id),
            sender_wallet: Set(new_tip.sender_wallet.to_lowercase()),
            recipient_wallet: Set(new_tip.recipient_wallet.to_lowercase()),
            amount: Set(new_tip.amount),
            token: Set(new_tip.token),
            message: Set(new_tip.message),
            message_hash: Set(String::new()),
            transaction_hash: Set(None),
            status: Set(TipStatus::Pending.as_str().to_string()),
            created_at: Set(Utc::now()),
            confirmed_at: Set(None),
        };

        let inserted = self
            .breaker
            .execute(|| async { Ok(model.clone().insert(&self.conn).await?) })
            .await?;
        to_record(inserted)
    }

    async fn find(&self, id: &str) -> Result<Option<TipRecord>> {
        let model = self
            .breaker
            .execute(|| async { Ok(tip::Entity::find_by_id(id).one(&self.conn).await?) })
            .await?;
        model.map(to_record).transpose()
    }

    async fn set_message_hash(&self, id: &str, content_id: &str) -> Result<()> {
        let result = self
            .breaker
            .execute(|| async {
                Ok(tip::Entity::update_many()
                    .col_expr(tip::Column::MessageHash, Expr::value(content_id))
                    .filter(tip::Column::Id.eq(id))
                    .exec(&self.conn)
                    .await?)
            })
            .await?;
        if result.rows_affected == 0 {
            return Err(anyhow!("Tip {} not found", id));
        }
        Ok(())
    }

    async fn mark_submitted(&self, id: &str, tx_hash: &str) -> Result<bool> {
        let result = self
            .breaker
            .execute(|| async {
                Ok(tip::Entity::update_many()
                    .col_expr(
                        tip::Column::Status,
                        Expr::value(TipStatus::Submitted.as_str()),
                    )
                    .col_expr(tip::Column::TransactionHash, Expr::value(tx_hash))
                    .filter(tip::Column::Id.eq(id))
                    .filter(tip::Column::Status.eq(TipStatus::Pending.as_str()))
                    .exec(&self.conn)
                    .await?)
            })
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn mark_confirmed(&self, id: &str, tx_hash: &str, at: DateTime<Utc>) -> Result<bool> {
        let result = self
            .breaker
            .execute(|| async {
                Ok(tip::Entity::update_many()
                    .col_expr(
                        tip::Column::Status,
                        Expr::value(TipStatus::Confirmed.as_str()),
                    )
                    .col_expr(tip::Column::TransactionHash, Expr::value(tx_hash))
                    .col_expr(tip::Column::ConfirmedAt, Expr::value(at))
                    .filter(tip::Column::Id.eq(id))
                    .filter(tip::Column::Status.is_in(OPEN_STATUSES))
                    .exec(&self.conn)
                    .await?)
            })
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn mark_failed(&self, id: &str) -> Result<bool> {
        let result = self
            .breaker
            .execute(|| async {
                Ok(tip::Entity::update_many()
                    .col_expr(
                        tip::Column::Status,
                        Expr::value(TipStatus::Failed.as_str()),
                    )
                    .filter(tip::Column::Id.eq(id))
                    .filter(tip::Column::Status.is_in(OPEN_STATUSES))
                    .exec(&self.conn)
                    .await?)
            })
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn find_open_match(
        &self,
        sender_wallet: &str,
        recipient_wallet: &str,
        message_hash: &str,
    ) -> Result<Option<TipRecord>> {
        let model = self
            .breaker
            .execute(|| async {
                Ok(tip::Entity::find()
                    .filter(tip::Column::SenderWallet.eq(sender_wallet.to_lowercase()))
                    .filter(tip::Column::RecipientWallet.eq(recipient_wallet.to_lowercase()))
                    .filter(tip::Column::MessageHash.eq(message_hash))
                    .filter(tip::Column::Status.is_in(OPEN_STATUSES))
                    .order_by_asc(tip::Column::CreatedAt)
                    .one(&self.conn)
                    .await?)
            })
            .await?;
        model.map(to_record).transpose()
    }

    async fn list_open(&self) -> Result<Vec<TipRecord>> {
        let models = self
            .breaker
            .execute(|| async {
                Ok(tip::Entity::find()
                    .filter(tip::Column::Status.is_in(OPEN_STATUSES))
                    .order_by_asc(tip::Column::CreatedAt)
                    .all(&self.conn)
                    .await?)
            })
            .await?;
        models.into_iter().map(to_record).collect()
    }
}
