use super::{ApiJson, ApiPath, ApiQuery};
use crate::auth::{AuthUser, MaybeAuthUser};
use crate::error::ApiResult;
use crate::services::shop::{self, CartView, CheckoutOutcome, NewProduct, ProductUpdate};
use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use gym_core::{Order, Product};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize, Default)]
pub struct ProductQuery {
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddToCart {
    pub product_id: Uuid,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct SetQuantity {
    pub quantity: i64,
}

#[derive(Debug, Deserialize, Default)]
pub struct CheckoutRequest {
    pub promo_code: Option<String>,
}

pub async fn list_products(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ProductQuery>,
) -> ApiResult<Json<Vec<Product>>> {
    Ok(Json(shop::list_products(&state, query.category.as_deref()).await?))
}

pub async fn get_product(
    State(state): State<AppState>,
    caller: MaybeAuthUser,
    ApiPath(product_id): ApiPath<Uuid>,
) -> ApiResult<Json<Product>> {
    Ok(Json(shop::get_product(&state, product_id, caller.is_admin()).await?))
}

pub async fn create_product(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiJson(new_product): ApiJson<NewProduct>,
) -> ApiResult<(StatusCode, Json<Product>)> {
    caller.require_admin()?;
    let product = shop::create_product(&state, new_product).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn update_product(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiPath(product_id): ApiPath<Uuid>,
    ApiJson(update): ApiJson<ProductUpdate>,
) -> ApiResult<Json<Product>> {
    caller.require_admin()?;
    Ok(Json(shop::update_product(&state, product_id, update).await?))
}

pub async fn view_cart(State(state): State<AppState>, caller: AuthUser) -> ApiResult<Json<CartView>> {
    Ok(Json(shop::view_cart(&state, caller.user()).await?))
}

pub async fn add_to_cart(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiJson(request): ApiJson<AddToCart>,
) -> ApiResult<Json<CartView>> {
    let cart = shop::add_to_cart(&state, caller.user(), request.product_id, request.quantity).await?;
    Ok(Json(cart))
}

pub async fn set_cart_quantity(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiPath(product_id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<SetQuantity>,
) -> ApiResult<Json<CartView>> {
    let cart = shop::set_cart_quantity(&state, caller.user(), product_id, request.quantity).await?;
    Ok(Json(cart))
}

pub async fn remove_from_cart(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiPath(product_id): ApiPath<Uuid>,
) -> ApiResult<StatusCode> {
    shop::remove_from_cart(&state, caller.user(), product_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn clear_cart(State(state): State<AppState>, caller: AuthUser) -> ApiResult<StatusCode> {
    shop::clear_cart(&state, caller.user()).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn checkout(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiJson(request): ApiJson<CheckoutRequest>,
) -> ApiResult<(StatusCode, Json<CheckoutOutcome>)> {
    let outcome = shop::checkout(&state, caller.user(), request.promo_code.as_deref()).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn my_orders(State(state): State<AppState>, caller: AuthUser) -> ApiResult<Json<Vec<Order>>> {
    Ok(Json(shop::my_orders(&state, caller.user()).await?))
}

pub async fn get_order(
    State(state): State<AppState>,
    caller: AuthUser,
    ApiPath(order_id): ApiPath<Uuid>,
) -> ApiResult<Json<Order>> {
    Ok(Json(shop::get_order(&state, caller.user(), order_id).await?))
}
