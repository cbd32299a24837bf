//! Drip log entity: one row per successfully relayed faucet request.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "faucet_requests")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Recipient account address, `0x` + 40 hex characters.
    #[sea_orm(column_type = "String(StringLen::N(42))")]
    pub recipient_address: String,
    /// IP address of the requester (for abuse detection)
    #[sea_orm(column_type = "String(StringLen::N(45))")]
    pub ip_address: String,
    /// Display value of the dispensed amount, e.g. "1000 tUSDC"
    #[sea_orm(column_type = "String(StringLen::N(32))")]
    pub amount: String,
    /// Transaction hash of the relayed call
    #[sea_orm(column_type = "String(StringLen::N(66))")]
    pub tx_hash: String,
    /// Timestamp of the request
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
