//! Per-endpoint request metrics.
//!
//! Endpoints are keyed by their route pattern (`GET /api/v1/recordings/{user_uid}`)
//! so per-user paths collapse into one entry. Unmatched paths share a
//! single `"<unmatched>"` key.

use crate::state::AppState;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    web, Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};

pub struct MetricsMiddleware;

impl<S, B> Transform<S, ServiceRequest> for MetricsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = MetricsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetricsMiddlewareService { service }))
    }
}

pub struct MetricsMiddlewareService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for MetricsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        let pattern = req
            .match_pattern()
            .unwrap_or_else(|| "<unmatched>".to_string());
        let endpoint = format!("{} {}", req.method(), pattern);

        let app_state = req.app_data::<web::Data<AppState>>().cloned();
        if let Some(state) = &app_state {
            state.increment_request_count();
        }

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration_ms = start_time.elapsed().as_millis() as u64;

            let is_error = match &result {
                Ok(response) => {
                    response.status().is_client_error() || response.status().is_server_error()
                }
                Err(_) => true,
            };

            if let Some(state) = app_state {
                state.record_endpoint_request(&endpoint, duration_ms, is_error);
                if is_error {
                    state.increment_error_count();
                }
            }

            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::{test, App, HttpResponse};

    #[actix_web::test]
    async fn test_records_by_route_pattern() {
        let state = AppState::new(AppConfig::default()).unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .wrap(MetricsMiddleware)
                .route(
                    "/recordings/{user_uid}",
                    web::get().to(|| async { HttpResponse::Ok().finish() }),
                )
                .route(
                    "/fail",
                    web::get().to(|| async { HttpResponse::BadRequest().finish() }),
                ),
        )
        .await;

        for uri in ["/recordings/alice", "/recordings/bob", "/fail"] {
            let req = test::TestRequest::get().uri(uri).to_request();
            test::call_service(&app, req).await;
        }

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.request_count, 3);
        assert_eq!(snapshot.error_count, 1);
        assert_eq!(snapshot.endpoint_metrics["GET /recordings/{user_uid}"].request_count, 2);
        assert_eq!(snapshot.endpoint_metrics["GET /fail"].error_count, 1);
    }
}
