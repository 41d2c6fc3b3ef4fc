use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;

use crate::domain::entities::orders::OrderEntity;

#[automock]
#[async_trait]
pub trait OrderRepository {
    async fn find_by_id(&self, order_id: i32) -> Result<Option<OrderEntity>>;
}
