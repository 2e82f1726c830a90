use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use http::Request as HttpRequest;
use http::Response as HttpResponse;
use http_body_util::combinators::UnsyncBoxBody;
use jsonwebtoken::{DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tonic::Status;
use tower::{Layer, Service};

/// JWT claims issued by the inventory app's login flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub username: String,
    pub exp: usize,
}

/// Authenticated user info injected by the auth middleware into request extensions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub username: String,
}

/// Public paths that do not require JWT authentication
const PUBLIC_PATHS: &[&str] = &["/grpc.health.v1.Health/Check"];

#[derive(Clone)]
pub struct AuthLayer {
    pool: SqlitePool,
    jwt_secret: String,
}

impl AuthLayer {
    pub fn new(pool: SqlitePool, jwt_secret: String) -> Self {
        Self { pool, jwt_secret }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthMiddleware {
            inner,
            pool: self.pool.clone(),
            jwt_secret: self.jwt_secret.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AuthMiddleware<S> {
    inner: S,
    pool: SqlitePool,
    jwt_secret: String,
}

type BoxBody = UnsyncBoxBody<bytes::Bytes, Status>;

fn bearer_token<B>(req: &HttpRequest<B>) -> Option<&str> {
    req.headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Resolves a bearer token to a user that still exists in the store.
pub async fn resolve_user(
    pool: &SqlitePool,
    jwt_secret: &str,
    token: &str,
) -> Option<AuthenticatedUser> {
    let claims = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .ok()?
    .claims;

    let username = sqlx::query_scalar::<_, String>("SELECT username FROM users WHERE id = ?")
        .bind(&claims.sub)
        .fetch_optional(pool)
        .await;

    match username {
        Ok(Some(username)) => Some(AuthenticatedUser {
            user_id: claims.sub,
            username,
        }),
        Ok(None) => {
            tracing::warn!("Token subject {} no longer exists", claims.sub);
            None
        }
        Err(e) => {
            tracing::error!("Failed to look up token subject {}: {}", claims.sub, e);
            None
        }
    }
}

impl<S, ReqBody> Service<HttpRequest<ReqBody>> for AuthMiddleware<S>
where
    S: Service<HttpRequest<ReqBody>, Response = HttpResponse<BoxBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = HttpResponse<BoxBody>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: HttpRequest<ReqBody>) -> Self::Future {
        let mut inner = self.inner.clone();
        std::mem::swap(&mut self.inner, &mut inner);

        let pool = self.pool.clone();
        let jwt_secret = self.jwt_secret.clone();

        Box::pin(async move {
            let path = req.uri().path();
            if PUBLIC_PATHS.iter().any(|p| *p == path) {
                return inner.call(req).await;
            }

            let token = bearer_token(&req).map(str::to_string);
            if let Some(token) = token {
                if let Some(user) = resolve_user(&pool, &jwt_secret, &token).await {
                    req.extensions_mut().insert(user);
                }
            }
            // No valid JWT: pass through, the service answers UNAUTHENTICATED

            inner.call(req).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{store, testing};
    use jsonwebtoken::{EncodingKey, Header};

    const SECRET: &str = "test-secret";

    fn token(sub: &str, username: &str, secret: &str) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            username: username.to_string(),
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        };
        jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_resolve_user() {
        let (_dir, pool) = testing::pool().await;
        let mut conn = pool.acquire().await.unwrap();
        store::upsert(&mut conn, &testing::user("U1", "admin")).await.unwrap();
        drop(conn);

        let user = resolve_user(&pool, SECRET, &token("U1", "admin", SECRET)).await;
        assert_eq!(
            user,
            Some(AuthenticatedUser {
                user_id: "U1".to_string(),
                username: "admin".to_string(),
            })
        );

        assert!(resolve_user(&pool, SECRET, &token("U1", "admin", "other")).await.is_none());
        assert!(resolve_user(&pool, SECRET, &token("U9", "ghost", SECRET)).await.is_none());
        assert!(resolve_user(&pool, SECRET, "garbage").await.is_none());
    }

    #[test]
    fn test_bearer_token() {
        let req = HttpRequest::builder()
            .header("authorization", "Bearer abc.def")
            .body(())
            .unwrap();
        assert_eq!(bearer_token(&req), Some("abc.def"));

        let req = HttpRequest::builder()
            .header("authorization", "Basic abc")
            .body(())
            .unwrap();
        assert_eq!(bearer_token(&req), None);
    }
}
