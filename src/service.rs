use tonic::{Request, Response, Status};
use uuid::Uuid;

use crate::credentials::CredentialStore;
use crate::error::{AuthError, Result};
use crate::gate::Principal;
use crate::proto::identity_service_server::IdentityService;
use crate::proto::{
    CurrentUserRequest, CurrentUserResponse, HealthCheckRequest, HealthCheckResponse,
    LoginRequest, LoginResponse, RegisterRequest, RegisterResponse,
};
use crate::token::{TokenClaims, TokenService};

/// Status reported by the health check.
pub const SERVING: &str = "SERVING";

const MAX_USERNAME_LEN: usize = 64;
const MAX_EMAIL_LEN: usize = 254;
const MAX_PASSWORD_BYTES: usize = 1024;

/// Test account registered at boot in development.
pub const DEVELOPMENT_USER: (&str, &str, &str) = ("username", "thisisanemail@web.de", "password");

/// Handler set shared by the gRPC service and the HTTP routes.
#[derive(Clone)]
pub struct Handlers {
    credentials: CredentialStore,
    tokens: TokenService,
}

/// Result of a successful registration.
#[derive(Clone, Debug)]
pub struct Registration {
    /// New user identifier.
    pub user_id: Uuid,
    /// Token for the new user.
    pub token: String,
}

impl Handlers {
    /// Creates the handler set.
    pub fn new(credentials: CredentialStore, tokens: TokenService) -> Self {
        Self {
            credentials,
            tokens,
        }
    }

    /// Authenticates by username or email and issues a token.
    ///
    /// # Errors
    /// [`AuthError::InvalidArgument`] for empty fields, otherwise the
    /// [`CredentialStore::authenticate`] errors.
    pub async fn login(&self, identity: &str, password: &str) -> Result<String> {
        if identity.is_empty() || password.is_empty() {
            return Err(AuthError::InvalidArgument(
                "username and password are required".to_string(),
            ));
        }

        // Registration never accepts longer passwords.
        if password.len() > MAX_PASSWORD_BYTES {
            return Err(AuthError::InvalidCredentials);
        }

        let user = self.credentials.authenticate(identity, password).await?;
        let token = self.tokens.issue(user.id, &user.username)?;
        tracing::info!(user_id = %user.id, "login succeeded");
        Ok(token)
    }

    /// Registers a user and issues a token for it.
    ///
    /// # Errors
    /// [`AuthError::InvalidArgument`] for malformed fields, otherwise the
    /// [`CredentialStore::register`] errors.
    pub async fn register(&self, username: &str, email: &str, password: &str) -> Result<Registration> {
        validate_username(username)?;
        validate_email(email)?;
        validate_password(password)?;

        let user_id = self.credentials.register(username, email, password).await?;
        let token = self.tokens.issue(user_id, username)?;
        Ok(Registration { user_id, token })
    }

    /// Liveness status.
    pub fn health(&self) -> &'static str {
        SERVING
    }

    /// Registers [`DEVELOPMENT_USER`], tolerating a previous registration.
    pub async fn bootstrap_development_user(&self) {
        let (username, email, password) = DEVELOPMENT_USER;
        match self.register(username, email, password).await {
            Ok(registration) => {
                tracing::info!(user_id = %registration.user_id, username, "registered development user");
            }
            Err(AuthError::AlreadyExists(field)) => {
                tracing::info!(%field, "development user already present");
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to register development user");
            }
        }
    }
}

fn validate_username(username: &str) -> Result<()> {
    if username.is_empty() {
        return Err(AuthError::InvalidArgument(
            "username cannot be empty".to_string(),
        ));
    }

    if username.len() > MAX_USERNAME_LEN {
        return Err(AuthError::InvalidArgument("username too long".to_string()));
    }

    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err(AuthError::InvalidArgument(
            "username contains invalid characters".to_string(),
        ));
    }

    Ok(())
}

fn validate_email(email: &str) -> Result<()> {
    if email.len() > MAX_EMAIL_LEN {
        return Err(AuthError::InvalidArgument("email too long".to_string()));
    }

    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => {
            Ok(())
        }
        _ => Err(AuthError::InvalidArgument("email is malformed".to_string())),
    }
}

fn validate_password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(AuthError::InvalidArgument(
            "password cannot be empty".to_string(),
        ));
    }

    if password.len() > MAX_PASSWORD_BYTES {
        return Err(AuthError::InvalidArgument("password too long".to_string()));
    }

    Ok(())
}

impl From<&TokenClaims> for CurrentUserResponse {
    fn from(claims: &TokenClaims) -> Self {
        Self {
            user_id: claims.sub.to_string(),
            username: claims.name.clone(),
            issued_at: claims.iat,
            expires_at: claims.exp,
        }
    }
}

/// gRPC service backed by [`Handlers`].
pub struct IdentityServiceImpl {
    handlers: Handlers,
}

impl IdentityServiceImpl {
    /// Creates the gRPC service.
    pub fn new(handlers: Handlers) -> Self {
        Self { handlers }
    }
}

#[tonic::async_trait]
impl IdentityService for IdentityServiceImpl {
    async fn login(
        &self,
        request: Request<LoginRequest>,
    ) -> std::result::Result<Response<LoginResponse>, Status> {
        let req = request.into_inner();
        let token = self.handlers.login(&req.username, &req.password).await?;
        Ok(Response::new(LoginResponse { token }))
    }

    async fn health_check(
        &self,
        _request: Request<HealthCheckRequest>,
    ) -> std::result::Result<Response<HealthCheckResponse>, Status> {
        Ok(Response::new(HealthCheckResponse {
            status: self.handlers.health().to_string(),
        }))
    }

    async fn register(
        &self,
        request: Request<RegisterRequest>,
    ) -> std::result::Result<Response<RegisterResponse>, Status> {
        let req = request.into_inner();
        let registration = self
            .handlers
            .register(&req.username, &req.email, &req.password)
            .await?;

        Ok(Response::new(RegisterResponse {
            user_id: registration.user_id.to_string(),
            token: registration.token,
        }))
    }

    async fn current_user(
        &self,
        request: Request<CurrentUserRequest>,
    ) -> std::result::Result<Response<CurrentUserResponse>, Status> {
        let principal = request
            .extensions()
            .get::<Principal>()
            .ok_or_else(|| Status::from(AuthError::Unauthenticated))?;

        Ok(Response::new(CurrentUserResponse::from(principal.claims())))
    }
}
