//! Order command handlers.

use simbridge_core::{Gateway, OrderAck, OrderSide, OrderStatus, OrderTicket};

use crate::cli::{GlobalOpts, OrderArgs, OrderCommand, TicketArgs};
use crate::error::CliError;
use crate::output;

pub async fn handle(
    gateway: &Gateway,
    args: OrderArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    gateway.connect().await?;

    let ack = match args.command {
        OrderCommand::Buy(ticket) => submit(gateway, OrderSide::Buy, &ticket).await?,
        OrderCommand::Sell(ticket) => submit(gateway, OrderSide::Sell, &ticket).await?,
        OrderCommand::Cancel { order_id } => gateway.cancel_order(&order_id).await?,
    };

    if ack.status == OrderStatus::Rejected {
        return Err(CliError::OrderRejected {
            reason: ack.reason.unwrap_or_else(|| "no reason given".into()),
        });
    }

    let out = output::render_single(&global.output, &ack, format_ack);
    output::print_output(&out);
    Ok(())
}

async fn submit(
    gateway: &Gateway,
    side: OrderSide,
    args: &TicketArgs,
) -> Result<OrderAck, CliError> {
    if args.quantity <= 0.0 {
        return Err(CliError::Validation {
            field: "quantity".into(),
            reason: "must be positive".into(),
        });
    }
    if let Some(price) = args.limit
        && price <= 0.0
    {
        return Err(CliError::Validation {
            field: "limit".into(),
            reason: "must be positive".into(),
        });
    }

    let mut ticket = match args.limit {
        Some(price) => OrderTicket::limit(args.symbol.clone(), side, args.quantity, price),
        None => OrderTicket::market(args.symbol.clone(), side, args.quantity),
    };
    ticket.book_id.clone_from(&args.book);

    tracing::info!(
        symbol = %ticket.symbol,
        side = ?side,
        quantity = ticket.quantity,
        client_order_id = %ticket.client_order_id,
        "submitting order"
    );
    Ok(gateway.submit_order(&ticket).await?)
}

fn format_ack(ack: &OrderAck) -> String {
    format!(
        "order {} {} at {}",
        ack.order_id,
        status_label(ack.status),
        ack.submitted_at.to_rfc3339()
    )
}

fn status_label(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Accepted => "accepted",
        OrderStatus::Rejected => "rejected",
        OrderStatus::Filled => "filled",
        OrderStatus::PartiallyFilled => "partially filled",
        OrderStatus::Cancelled => "cancelled",
    }
}
