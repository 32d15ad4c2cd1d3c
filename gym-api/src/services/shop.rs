use crate::error::{ApiError, ApiResult};
use crate::metrics::{increment, MetricName};
use crate::services::payment;
use crate::state::AppState;
use gym_core::{
    CartItem, Order, OrderItem, OrderStatus, Payment, PaymentKind, Product, PromotionScope, Role,
    User, MAX_AMOUNT_CENTS, MAX_QUANTITY,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub description: Option<String>,
    pub category: String,
    pub price_cents: i64,
    pub stock: i64,
}

#[derive(Debug, Deserialize, Default)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub price_cents: Option<i64>,
    pub stock: Option<i64>,
    pub active: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct CartLine {
    pub product_id: Uuid,
    pub name: String,
    pub unit_price_cents: i64,
    pub quantity: i64,
    pub line_total_cents: i64,
}

#[derive(Debug, Serialize)]
pub struct CartView {
    pub items: Vec<CartLine>,
    pub subtotal_cents: i64,
}

#[derive(Debug, Serialize)]
pub struct CheckoutOutcome {
    pub order: Order,
    pub payment: Payment,
    pub checkout_url: Option<String>,
}

fn check_price(price_cents: i64) -> ApiResult<()> {
    if !(0..=MAX_AMOUNT_CENTS).contains(&price_cents) {
        return Err(ApiError::validation(format!(
            "price_cents must be between 0 and {MAX_AMOUNT_CENTS}"
        )));
    }
    Ok(())
}

fn check_stock(stock: i64) -> ApiResult<()> {
    if !(0..=MAX_QUANTITY).contains(&stock) {
        return Err(ApiError::validation(format!(
            "stock must be between 0 and {MAX_QUANTITY}"
        )));
    }
    Ok(())
}

pub async fn list_products(state: &AppState, category: Option<&str>) -> ApiResult<Vec<Product>> {
    let category = category.map(str::trim).filter(|c| !c.is_empty());
    Ok(state.storage.list_products(category, false).await?)
}

/// Inactive products are hidden from everyone but admins.
pub async fn get_product(state: &AppState, product_id: Uuid, include_inactive: bool) -> ApiResult<Product> {
    state
        .storage
        .get_product(product_id)
        .await?
        .filter(|p| p.active || include_inactive)
        .ok_or_else(|| ApiError::not_found("product not found"))
}

pub async fn create_product(state: &AppState, new_product: NewProduct) -> ApiResult<Product> {
    let name = new_product.name.trim();
    let category = new_product.category.trim();
    if name.is_empty() || category.is_empty() {
        return Err(ApiError::validation("name and category are required"));
    }
    check_price(new_product.price_cents)?;
    check_stock(new_product.stock)?;

    let now = state.clock.now();
    let product = Product {
        id: Uuid::new_v4(),
        name: name.to_string(),
        description: new_product.description,
        category: category.to_string(),
        price_cents: new_product.price_cents,
        stock: new_product.stock,
        active: true,
        created_at: now,
        updated_at: now,
    };
    state.storage.create_product(&product).await?;
    info!("Created product {} ({})", product.id, product.name);
    Ok(product)
}

pub async fn update_product(state: &AppState, product_id: Uuid, update: ProductUpdate) -> ApiResult<Product> {
    let mut product = get_product(state, product_id, true).await?;

    if let Some(name) = update.name {
        let name = name.trim();
        if name.is_empty() {
            return Err(ApiError::validation("name cannot be empty"));
        }
        product.name = name.to_string();
    }
    if let Some(category) = update.category {
        let category = category.trim();
        if category.is_empty() {
            return Err(ApiError::validation("category cannot be empty"));
        }
        product.category = category.to_string();
    }
    if let Some(description) = update.description {
        product.description = Some(description);
    }
    if let Some(price) = update.price_cents {
        check_price(price)?;
        product.price_cents = price;
    }
    if let Some(stock) = update.stock {
        check_stock(stock)?;
        product.stock = stock;
    }
    if let Some(active) = update.active {
        product.active = active;
    }
    product.updated_at = state.clock.now();
    state.storage.update_product(&product).await?;
    Ok(product)
}

pub async fn view_cart(state: &AppState, user: &User) -> ApiResult<CartView> {
    let mut items = Vec::new();
    for item in state.storage.list_cart_items(user.id).await? {
        if let Some(product) = state.storage.get_product(item.product_id).await? {
            items.push(CartLine {
                product_id: product.id,
                name: product.name,
                unit_price_cents: product.price_cents,
                quantity: item.quantity,
                line_total_cents: product.price_cents.saturating_mul(item.quantity),
            });
        }
    }
    let subtotal_cents = items
        .iter()
        .map(|line| line.line_total_cents)
        .fold(0, i64::saturating_add);
    Ok(CartView {
        items,
        subtotal_cents,
    })
}

fn out_of_stock(product: &Product) -> ApiError {
    ApiError::conflict(format!("only {} of {} in stock", product.stock, product.name))
}

fn ensure_in_stock(product: &Product, quantity: i64) -> ApiResult<()> {
    if quantity > product.stock {
        return Err(out_of_stock(product));
    }
    Ok(())
}

/// Adds `quantity` on top of what is already in the cart.
pub async fn add_to_cart(state: &AppState, user: &User, product_id: Uuid, quantity: i64) -> ApiResult<CartView> {
    if quantity <= 0 {
        return Err(ApiError::validation("quantity must be positive"));
    }
    let product = get_product(state, product_id, false).await?;

    let existing = state
        .storage
        .list_cart_items(user.id)
        .await?
        .into_iter()
        .find(|item| item.product_id == product_id);
    let total = existing
        .as_ref()
        .map_or(0, |item| item.quantity)
        .checked_add(quantity)
        .ok_or_else(|| out_of_stock(&product))?;
    ensure_in_stock(&product, total)?;

    let item = CartItem {
        user_id: user.id,
        product_id,
        quantity: total,
        added_at: existing.map_or_else(|| state.clock.now(), |item| item.added_at),
    };
    state.storage.set_cart_item(&item).await?;
    view_cart(state, user).await
}

/// Sets the quantity of a line already in the cart; zero removes it.
pub async fn set_cart_quantity(state: &AppState, user: &User, product_id: Uuid, quantity: i64) -> ApiResult<CartView> {
    if quantity < 0 {
        return Err(ApiError::validation("quantity cannot be negative"));
    }
    let existing = state
        .storage
        .list_cart_items(user.id)
        .await?
        .into_iter()
        .find(|item| item.product_id == product_id)
        .ok_or_else(|| ApiError::not_found("product is not in the cart"))?;

    if quantity == 0 {
        state.storage.remove_cart_item(user.id, product_id).await?;
        return view_cart(state, user).await;
    }

    let product = get_product(state, product_id, false).await?;
    ensure_in_stock(&product, quantity)?;
    state
        .storage
        .set_cart_item(&CartItem {
            quantity,
            ..existing
        })
        .await?;
    view_cart(state, user).await
}

pub async fn remove_from_cart(state: &AppState, user: &User, product_id: Uuid) -> ApiResult<()> {
    Ok(state.storage.remove_cart_item(user.id, product_id).await?)
}

pub async fn clear_cart(state: &AppState, user: &User) -> ApiResult<()> {
    Ok(state.storage.clear_cart(user.id).await?)
}

/// Turns the cart into an order: snapshot prices, reserve stock, open the payment.
pub async fn checkout(state: &AppState, buyer: &User, promo_code: Option<&str>) -> ApiResult<CheckoutOutcome> {
    let cart = state.storage.list_cart_items(buyer.id).await?;
    if cart.is_empty() {
        return Err(ApiError::validation("cart is empty"));
    }

    let mut items = Vec::with_capacity(cart.len());
    for line in &cart {
        let product = state
            .storage
            .get_product(line.product_id)
            .await?
            .filter(|p| p.active)
            .ok_or_else(|| {
                ApiError::conflict(format!(
                    "product {} is no longer available, remove it from the cart",
                    line.product_id
                ))
            })?;
        items.push(OrderItem {
            product_id: product.id,
            product_name: product.name,
            unit_price_cents: product.price_cents,
            quantity: line.quantity,
        });
    }

    let subtotal = Order::subtotal(&items);
    let discount =
        payment::reserve_promotion(state, promo_code, PromotionScope::Products, subtotal).await?;

    let now = state.clock.now();
    let mut order = Order {
        id: Uuid::new_v4(),
        user_id: buyer.id,
        status: OrderStatus::PendingPayment,
        subtotal_cents: subtotal,
        discount_cents: discount.discount_cents,
        total_cents: subtotal - discount.discount_cents,
        promotion_id: discount.promotion_id(),
        payment_id: None,
        items,
        created_at: now,
    };
    let mut pending = Payment::pending(
        buyer.id,
        PaymentKind::Order,
        order.id,
        order.total_cents,
        &state.settings.payment.currency,
        now,
    );
    pending.promotion_id = order.promotion_id;
    order.payment_id = Some(pending.id);

    if let Err(e) = state.storage.place_order(&order).await {
        payment::release_promotion(state, order.promotion_id).await;
        return Err(e.into());
    }
    if let Err(e) = state.storage.create_payment(&pending).await {
        if let Err(cancel_err) = state.storage.cancel_order(order.id).await {
            warn!("Failed to roll back order {}: {}", order.id, cancel_err);
        }
        payment::release_promotion(state, order.promotion_id).await;
        return Err(e.into());
    }
    increment(MetricName::OrdersPlaced);
    info!(
        "Order {} placed by {} with {} lines ({} cents)",
        order.id,
        buyer.id,
        order.items.len(),
        order.total_cents
    );

    let description = match order.items.as_slice() {
        [only] => format!("{} x {}", only.quantity, only.product_name),
        many => format!("Gym shop order ({} items)", many.len()),
    };
    let checkout_url = payment::start_checkout(state, buyer, &pending, description).await?;

    let order = state.storage.get_order(order.id).await?.unwrap_or(order);
    let payment = payment::reload_payment(state, pending.id).await?;
    Ok(CheckoutOutcome {
        order,
        payment,
        checkout_url,
    })
}

pub async fn my_orders(state: &AppState, user: &User) -> ApiResult<Vec<Order>> {
    Ok(state.storage.list_orders_for_user(user.id).await?)
}

/// Orders are visible to their owner and to admins; anyone else gets 404.
pub async fn get_order(state: &AppState, viewer: &User, order_id: Uuid) -> ApiResult<Order> {
    state
        .storage
        .get_order(order_id)
        .await?
        .filter(|o| o.user_id == viewer.id || viewer.role == Role::Admin)
        .ok_or_else(|| ApiError::not_found("order not found"))
}
