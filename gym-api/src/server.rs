use crate::handlers::{auth, checkin, coaching, membership, ops, payment, promotion, shop, users};
use crate::state::AppState;
use axum::http::Method;
use axum::routing::{get, patch, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Create the HTTP router with every route of the API
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(ops::health))
        .route("/metrics", get(ops::metrics))
        // Authentication
        .route("/auth/register", post(auth::register))
        .route("/auth/verify-email", post(auth::verify_email))
        .route("/auth/otp/resend", post(auth::resend_otp))
        .route("/auth/login", post(auth::login))
        .route("/auth/google", post(auth::google_login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/password/forgot", post(auth::forgot_password))
        .route("/auth/password/reset", post(auth::reset_password))
        .route("/auth/password/change", post(auth::change_password))
        .route("/me", get(auth::me).patch(auth::update_me))
        // Administration
        .route("/admin/users", get(users::list_users))
        .route("/admin/users/:id", patch(users::update_user))
        // Memberships
        .route(
            "/membership-plans",
            get(membership::list_plans).post(membership::create_plan),
        )
        .route("/membership-plans/:id", patch(membership::update_plan))
        .route("/memberships/purchase", post(membership::purchase))
        .route("/memberships/renew", post(membership::renew))
        .route("/memberships/me", get(membership::my_memberships))
        // Payments
        .route("/payments/webhook", post(payment::webhook))
        .route("/payments/:id", get(payment::get_payment))
        // Check-ins
        .route(
            "/checkins",
            get(checkin::list_for_day).post(checkin::check_in),
        )
        .route("/checkins/validate", post(checkin::validate))
        .route("/checkins/me", get(checkin::my_history))
        // Coaching
        .route(
            "/coaches",
            get(coaching::list_coaches).post(coaching::upsert_coach),
        )
        .route("/bookings", post(coaching::book))
        .route("/bookings/me", get(coaching::my_bookings))
        .route("/bookings/:id/cancel", post(coaching::cancel))
        .route("/bookings/:id/complete", post(coaching::complete))
        .route("/coach/bookings", get(coaching::coach_bookings))
        // Shop
        .route(
            "/products",
            get(shop::list_products).post(shop::create_product),
        )
        .route(
            "/products/:id",
            get(shop::get_product).patch(shop::update_product),
        )
        .route("/cart", get(shop::view_cart).delete(shop::clear_cart))
        .route("/cart/items", post(shop::add_to_cart))
        .route(
            "/cart/items/:product_id",
            patch(shop::set_cart_quantity).delete(shop::remove_from_cart),
        )
        .route("/cart/checkout", post(shop::checkout))
        .route("/orders/me", get(shop::my_orders))
        .route("/orders/:id", get(shop::get_order))
        // Promotions
        .route(
            "/promotions",
            get(promotion::list).post(promotion::create),
        )
        .route("/promotions/validate", post(promotion::validate))
        .route("/promotions/:id", patch(promotion::update))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Bind `addr` and serve until the process is stopped
pub async fn start_server(state: AppState, addr: &str) -> anyhow::Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("HTTP server running on http://{}", addr);
    info!("Health check: http://{}/health", addr);
    info!("Metrics:      http://{}/metrics", addr);

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
