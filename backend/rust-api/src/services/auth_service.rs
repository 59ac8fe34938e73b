use anyhow::Context;
use chrono::Utc;
use mongodb::bson::doc;
use mongodb::bson::oid::ObjectId;
use mongodb::{Client, Collection, Database};

use crate::error::ApiError;
use crate::middlewares::auth::{JwtClaims, JwtService};
use crate::models::user::{AuthResponse, LoginRequest, RegisterRequest, User, UserProfile};
use crate::services::session_store::SESSIONS_COLLECTION;
use crate::services::stats_service::StatsService;

const USERS_COLLECTION: &str = "users";
const STATS_COLLECTION: &str = "user_stats";

const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 3600;

/// Account lifecycle: registration, login, profile lookup and full
/// account deletion with its data cascade.
pub struct AuthService {
    mongo_client: Client,
    mongo: Database,
    jwt_service: JwtService,
    access_token_ttl_seconds: i64,
}

impl AuthService {
    pub fn new(mongo_client: Client, mongo: Database, jwt_secret: &str) -> Self {
        let access_token_ttl_seconds = std::env::var("JWT_ACCESS_TOKEN_TTL_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_ACCESS_TOKEN_TTL_SECONDS);

        Self {
            mongo_client,
            mongo,
            jwt_service: JwtService::new(jwt_secret),
            access_token_ttl_seconds,
        }
    }

    fn users(&self) -> Collection<User> {
        self.mongo.collection(USERS_COLLECTION)
    }

    pub async fn register(&self, request: RegisterRequest) -> Result<AuthResponse, ApiError> {
        let existing = self
            .users()
            .find_one(doc! {
                "$or": [
                    { "email": &request.email },
                    { "username": &request.username },
                ]
            })
            .await
            .context("Failed to check for existing user")
            .map_err(ApiError::Internal)?;

        if existing.is_some() {
            return Err(ApiError::DuplicateRegistration);
        }

        let password_hash = hash_password(&request.password)?;

        let mut user = User {
            id: None,
            email: request.email,
            username: request.username,
            password_hash,
            is_verified: false,
            created_at: Utc::now(),
        };

        let inserted = self
            .users()
            .insert_one(&user)
            .await
            .context("Failed to insert user")
            .map_err(ApiError::Internal)?;

        let user_id = inserted
            .inserted_id
            .as_object_id()
            .context("Inserted user has no ObjectId")
            .map_err(ApiError::Internal)?;
        user.id = Some(user_id);

        // Stats row starts zeroed so the stats endpoints never 404.
        StatsService::new(self.mongo.clone())
            .ensure_row(&user_id.to_hex())
            .await?;

        tracing::info!("User registered: {}", user.username);

        let access_token = self.generate_access_token(&user_id.to_hex())?;
        Ok(AuthResponse {
            access_token,
            token_type: "Bearer".to_string(),
            user: UserProfile::from(user),
        })
    }

    pub async fn login(&self, request: LoginRequest) -> Result<AuthResponse, ApiError> {
        let user = self
            .users()
            .find_one(doc! { "email": &request.email })
            .await
            .context("Failed to query user by email")
            .map_err(ApiError::Internal)?
            .ok_or(ApiError::InvalidCredentials)?;

        if !verify_password(&request.password, &user.password_hash)? {
            tracing::warn!("Failed login attempt for {}", request.email);
            return Err(ApiError::InvalidCredentials);
        }

        let user_id = user
            .id
            .context("Stored user has no ObjectId")
            .map_err(ApiError::Internal)?;

        tracing::info!("User logged in: {}", user.username);

        let access_token = self.generate_access_token(&user_id.to_hex())?;
        Ok(AuthResponse {
            access_token,
            token_type: "Bearer".to_string(),
            user: UserProfile::from(user),
        })
    }

    pub async fn get_user_by_id(&self, user_id: &str) -> Result<User, ApiError> {
        let object_id = ObjectId::parse_str(user_id).map_err(|_| ApiError::InvalidCredentials)?;

        self.users()
            .find_one(doc! { "_id": object_id })
            .await
            .context("Failed to query user by id")
            .map_err(ApiError::Internal)?
            .ok_or(ApiError::InvalidCredentials)
    }

    /// Delete the account and everything it owns in one transaction:
    /// sessions, stats row, then the user itself.
    pub async fn delete_account(&self, user_id: &str) -> Result<(), ApiError> {
        let object_id = ObjectId::parse_str(user_id).map_err(|_| ApiError::InvalidCredentials)?;

        let mut session = self
            .mongo_client
            .start_session()
            .await
            .context("Failed to start MongoDB session")
            .map_err(ApiError::Internal)?;

        session
            .start_transaction()
            .await
            .context("Failed to start deletion transaction")
            .map_err(ApiError::Internal)?;

        let result = self
            .delete_account_in_transaction(&mut session, user_id, object_id)
            .await;

        match result {
            Ok(()) => {
                session
                    .commit_transaction()
                    .await
                    .context("Failed to commit deletion transaction")
                    .map_err(ApiError::Internal)?;
                tracing::info!("Account deleted: {}", user_id);
                Ok(())
            }
            Err(e) => {
                if let Err(abort_err) = session.abort_transaction().await {
                    tracing::error!("Failed to abort deletion transaction: {}", abort_err);
                }
                Err(e)
            }
        }
    }

    async fn delete_account_in_transaction(
        &self,
        session: &mut mongodb::ClientSession,
        user_id: &str,
        object_id: ObjectId,
    ) -> Result<(), ApiError> {
        self.mongo
            .collection::<mongodb::bson::Document>(SESSIONS_COLLECTION)
            .delete_many(doc! { "user_id": user_id })
            .session(&mut *session)
            .await
            .context("Failed to delete user game sessions")
            .map_err(ApiError::Internal)?;

        self.mongo
            .collection::<mongodb::bson::Document>(STATS_COLLECTION)
            .delete_many(doc! { "user_id": user_id })
            .session(&mut *session)
            .await
            .context("Failed to delete user stats")
            .map_err(ApiError::Internal)?;

        self.users()
            .delete_one(doc! { "_id": object_id })
            .session(&mut *session)
            .await
            .context("Failed to delete user")
            .map_err(ApiError::Internal)?;

        Ok(())
    }

    pub fn generate_access_token(&self, user_id: &str) -> Result<String, ApiError> {
        let now = Utc::now().timestamp();
        let claims = JwtClaims {
            sub: user_id.to_string(),
            exp: (now + self.access_token_ttl_seconds) as usize,
            iat: now as usize,
        };

        self.jwt_service
            .generate_token(claims)
            .context("Failed to generate access token")
            .map_err(ApiError::Internal)
    }
}

fn hash_password(password: &str) -> Result<String, ApiError> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
        .context("Failed to hash password")
        .map_err(ApiError::Internal)
}

fn verify_password(password: &str, hash: &str) -> Result<bool, ApiError> {
    bcrypt::verify(password, hash)
        .context("Failed to verify password")
        .map_err(ApiError::Internal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_and_verify() {
        let hash = hash_password("correct horse battery").unwrap();
        assert_ne!(hash, "correct horse battery");
        assert!(verify_password("correct horse battery", &hash).unwrap());
        assert!(!verify_password("wrong password", &hash).unwrap());
    }
}
