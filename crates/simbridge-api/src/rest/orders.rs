// Order endpoints.

use super::RestClient;
use super::models::{OrderAck, OrderTicket};
use crate::Error;

impl RestClient {
    /// Submit an order. The gateway acks synchronously; fills arrive
    /// later as `order_update` messages on the command channel.
    pub async fn submit_order(&self, ticket: &OrderTicket) -> Result<OrderAck, Error> {
        self.post("api/v1/orders", ticket).await
    }

    /// Cancel a working order by gateway order id.
    pub async fn cancel_order(&self, order_id: &str) -> Result<OrderAck, Error> {
        self.delete_with_response(&format!("api/v1/orders/{order_id}"))
            .await
    }
}
