//! Line item model shared by invoices and quotes.

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Persisted document line. Amounts are the calculator output at save time.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LineItem {
    pub line_id: Uuid,
    pub document_id: Uuid,
    pub position: i32,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub discount: Decimal,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}
