//! Registration, email verification, password-reset requests and member
//! administration.

use entity::{contribution, member, secret_token, secret_token::TokenKind};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::attachments::AttachmentTarget;
use crate::context::AppContext;
use crate::crypto::{hash_password_blocking, secrets_match, validate_password, verify_password_blocking};
use crate::db;
use crate::error::{Error, Result};
use crate::mail::{templates::data, TemplateKey};
use crate::notify::{Audience, Notification, Recipient};
use crate::tokens::{issue_in, PlaintextSecret};
use crate::util::normalize_email;

const MAX_NAME_LEN: usize = 100;

#[derive(Clone, Debug, Default)]
pub struct Registration {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password: String,
    pub admin_code: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RegistrationOutcome {
    pub member: member::Model,
    /// False when this call re-sent verification to an existing unverified member.
    pub created: bool,
    pub verification_required: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct VerifiedEmail {
    pub member_id: i32,
    pub verified_at: i64,
}

/// Fields left `None` are unchanged. `Some(None)` clears email or phone.
#[derive(Clone, Debug, Default)]
pub struct MemberPatch {
    pub name: Option<String>,
    pub email: Option<Option<String>>,
    pub phone: Option<Option<String>>,
    pub is_admin: Option<bool>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MemberRemoval {
    pub member_id: i32,
    pub contributions: usize,
    pub images: usize,
    /// Image objects whose delete failed; the orphan sweep collects them.
    pub orphaned: usize,
}

pub struct MemberService<'a> {
    ctx: &'a AppContext,
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn validate_name(raw: &str) -> Result<String> {
    let name = raw.trim().to_string();
    if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
        return Err(Error::validation(format!("name must be 1 to {MAX_NAME_LEN} characters")));
    }
    Ok(name)
}

impl<'a> MemberService<'a> {
    pub fn new(ctx: &'a AppContext) -> Self {
        Self { ctx }
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<member::Model>> {
        let Some(email) = normalize_email(email) else {
            return Ok(None);
        };
        Ok(member::Entity::find()
            .filter(member::Column::Email.eq(email))
            .one(&self.ctx.db)
            .await?)
    }

    /// Create a member and send them a verification link.
    ///
    /// Registering again with the address of an unverified member re-sends the
    /// link instead of failing; a verified address is a `Conflict`.
    pub async fn register(&self, input: Registration) -> Result<RegistrationOutcome> {
        let name = validate_name(&input.name)?;
        let email = input.email.as_deref().and_then(normalize_email);
        let phone = trimmed(input.phone);
        if email.is_none() && phone.is_none() {
            return Err(Error::validation("an email address or phone number is required"));
        }
        validate_password(&input.password)?;

        if let Some(existing) = match &email {
            Some(e) => self.find_by_email(e).await?,
            None => None,
        } {
            if existing.email_verified {
                return Err(Error::Conflict("email already registered".to_string()));
            }
            info!(member_id = existing.id, "Registration for unverified email, re-sending verification");
            let secret = self
                .ctx
                .tokens
                .issue(existing.id, TokenKind::EmailVerification, self.ctx.config.tokens.email_verification_ttl)
                .await?;
            self.send_verification(&existing, secret);
            return Ok(RegistrationOutcome {
                member: existing,
                created: false,
                verification_required: true,
            });
        }

        let is_admin = match (&input.admin_code, &self.ctx.config.admin_secret_code) {
            (Some(presented), Some(expected)) => secrets_match(presented.trim(), expected),
            _ => false,
        };
        let password_hash =
            hash_password_blocking(&input.password, self.ctx.config.tokens.password_hash_iterations).await?;

        let now = self.ctx.clock.now();
        let ttl = self.ctx.config.tokens.email_verification_ttl;
        let txn = self.ctx.db.begin().await?;
        let outcome = async {
            let member = member::ActiveModel {
                name: Set(name),
                email: Set(email),
                phone: Set(phone),
                password_hash: Set(password_hash),
                is_admin: Set(is_admin),
                email_verified: Set(false),
                email_verified_at: Set(None),
                joined_at: Set(now),
                ..Default::default()
            }
            .insert(&txn)
            .await?;
            let secret = issue_in(&txn, member.id, TokenKind::EmailVerification, ttl, now).await?;
            Ok::<_, Error>((member, secret))
        }
        .await;
        let (member, secret) = db::finish(txn, outcome).await?;

        info!(member_id = member.id, is_admin, has_email = member.email.is_some(), "Member registered");
        let verification_required = secret.is_some();
        self.send_verification(&member, secret);

        Ok(RegistrationOutcome {
            member,
            created: true,
            verification_required,
        })
    }

    pub async fn verify_email(&self, token: &str) -> Result<VerifiedEmail> {
        let consumed = self.ctx.tokens.consume(token, TokenKind::EmailVerification).await?;
        Ok(VerifiedEmail {
            member_id: consumed.member_id,
            verified_at: consumed.consumed_at,
        })
    }

    pub async fn resend_verification(&self, email: &str) -> Result<()> {
        let member = self
            .find_by_email(email)
            .await?
            .ok_or_else(|| Error::not_found("member"))?;
        if member.email_verified {
            return Err(Error::Conflict("email already verified".to_string()));
        }
        let secret = self
            .ctx
            .tokens
            .issue(member.id, TokenKind::EmailVerification, self.ctx.config.tokens.email_verification_ttl)
            .await?;
        self.send_verification(&member, secret);
        Ok(())
    }

    /// Check credentials. Unknown email and wrong password fail identically.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<member::Model> {
        let invalid = || Error::validation("invalid email or password");
        let member = self.find_by_email(email).await?.ok_or_else(invalid)?;
        if !verify_password_blocking(password, &member.password_hash).await? {
            return Err(invalid());
        }
        if !member.email_verified {
            return Err(Error::validation("email address not verified"));
        }
        Ok(member)
    }

    /// Issue a reset link. Succeeds silently for unknown addresses.
    pub async fn request_password_reset(&self, email: &str) -> Result<()> {
        let Some(member) = self.find_by_email(email).await? else {
            debug!("Password reset requested for unknown email");
            return Ok(());
        };
        let ttl = self.ctx.config.tokens.password_reset_ttl;
        let Some(secret) = self.ctx.tokens.issue(member.id, TokenKind::PasswordReset, ttl).await? else {
            return Ok(());
        };
        let Some(address) = member.email.clone() else {
            return Ok(());
        };

        let links = &self.ctx.config.links;
        let base = links.client_base_url.as_deref().unwrap_or(&links.app_base_url);
        let reset_url = format!("{}/reset-password?token={}", base.trim_end_matches('/'), secret.expose());
        self.ctx.dispatcher.notify(Notification {
            event: format!("auth.reset:{}", member.id),
            audience: Audience::Addresses(vec![Recipient::named(address, member.name.clone())]),
            template: TemplateKey::AuthReset,
            data: data([
                ("memberName", member.name.clone()),
                ("resetUrl", reset_url),
                ("expiresInMinutes", (ttl.as_secs() / 60).to_string()),
            ]),
        });
        Ok(())
    }

    pub async fn get(&self, id: i32) -> Result<member::Model> {
        member::Entity::find_by_id(id)
            .one(&self.ctx.db)
            .await?
            .ok_or_else(|| Error::not_found(format!("member {id}")))
    }

    pub async fn list(&self) -> Result<Vec<member::Model>> {
        Ok(member::Entity::find()
            .order_by_asc(member::Column::Id)
            .all(&self.ctx.db)
            .await?)
    }

    /// Patch contact details and the admin flag. Verification state is left
    /// as it is; an address taken by another member is a `Conflict`.
    pub async fn update(&self, id: i32, patch: MemberPatch) -> Result<member::Model> {
        let existing = self.get(id).await?;

        let email = match patch.email {
            Some(raw) => raw.as_deref().and_then(normalize_email),
            None => existing.email.clone(),
        };
        let phone = match patch.phone {
            Some(raw) => trimmed(raw),
            None => existing.phone.clone(),
        };
        if email.is_none() && phone.is_none() {
            return Err(Error::validation("an email address or phone number is required"));
        }
        if let Some(address) = email.as_deref().filter(|e| Some(*e) != existing.email.as_deref()) {
            if self.find_by_email(address).await?.is_some_and(|other| other.id != id) {
                return Err(Error::Conflict("email already registered".to_string()));
            }
        }

        let mut active: member::ActiveModel = existing.into();
        if let Some(name) = &patch.name {
            active.name = Set(validate_name(name)?);
        }
        active.email = Set(email);
        active.phone = Set(phone);
        if let Some(is_admin) = patch.is_admin {
            active.is_admin = Set(is_admin);
        }
        let updated = active.update(&self.ctx.db).await?;
        info!(member_id = id, is_admin = updated.is_admin, "Member updated");
        Ok(updated)
    }

    /// Remove a member together with their contributions.
    ///
    /// Each contribution goes through the attachment cascade first, so its
    /// image rows and objects are cleaned up the same way a single
    /// contribution delete does it. The member row and its tokens go last, in
    /// one transaction. If a cascade fails, the contributions already removed
    /// stay removed and the member row is kept; calling again finishes the job.
    pub async fn delete(&self, id: i32) -> Result<MemberRemoval> {
        self.get(id).await?;
        let contribution_ids: Vec<i32> = contribution::Entity::find()
            .select_only()
            .column(contribution::Column::Id)
            .filter(contribution::Column::MemberId.eq(id))
            .order_by_asc(contribution::Column::Id)
            .into_tuple()
            .all(&self.ctx.db)
            .await?;

        let mut removal = MemberRemoval {
            member_id: id,
            ..Default::default()
        };
        for contribution_id in contribution_ids {
            match self
                .ctx
                .attachments
                .cascade_cleanup(AttachmentTarget::Contribution(contribution_id))
                .await
            {
                Ok(outcome) => {
                    removal.contributions += 1;
                    removal.images += outcome.removed.len();
                    removal.orphaned += outcome.orphaned;
                }
                // Deleted by someone else in the meantime.
                Err(Error::NotFound(_)) => {}
                Err(e) => {
                    warn!(member_id = id, contribution_id, error = %e, "Member deletion stopped at contribution");
                    return Err(e);
                }
            }
        }

        let txn = self.ctx.db.begin().await?;
        let outcome: Result<()> = async {
            let remaining = contribution::Entity::find()
                .filter(contribution::Column::MemberId.eq(id))
                .count(&txn)
                .await?;
            if remaining > 0 {
                return Err(Error::Conflict(format!("member {id} gained contributions during deletion")));
            }
            secret_token::Entity::delete_many()
                .filter(secret_token::Column::MemberId.eq(id))
                .exec(&txn)
                .await?;
            let deleted = member::Entity::delete_by_id(id).exec(&txn).await?;
            if deleted.rows_affected == 0 {
                return Err(Error::not_found(format!("member {id}")));
            }
            Ok(())
        }
        .await;
        db::finish(txn, outcome).await?;

        info!(
            member_id = id,
            contributions = removal.contributions,
            images = removal.images,
            orphaned = removal.orphaned,
            "Member deleted"
        );
        Ok(removal)
    }

    /// Promote an existing member with the configured admin code.
    pub async fn upgrade_to_admin(&self, id: i32, admin_code: &str) -> Result<member::Model> {
        let code_ok = self
            .ctx
            .config
            .admin_secret_code
            .as_deref()
            .is_some_and(|expected| secrets_match(admin_code.trim(), expected));
        if !code_ok {
            return Err(Error::validation("invalid admin secret code"));
        }
        let member = self.get(id).await?;
        if member.is_admin {
            return Err(Error::validation("member is already an admin"));
        }

        let promoted = member::Entity::update_many()
            .col_expr(member::Column::IsAdmin, Expr::value(true))
            .filter(member::Column::Id.eq(id))
            .filter(member::Column::IsAdmin.eq(false))
            .exec(&self.ctx.db)
            .await?;
        if promoted.rows_affected == 0 {
            return Err(Error::validation("member is already an admin"));
        }
        info!(member_id = id, "Member upgraded to admin");
        self.get(id).await
    }

    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<i32> {
        self.ctx.credentials.reset_password(token, new_password).await
    }

    fn send_verification(&self, member: &member::Model, secret: Option<PlaintextSecret>) {
        let (Some(secret), Some(address)) = (secret, member.email.clone()) else {
            return;
        };
        let verification_url = format!(
            "{}/api/auth/verify-email?token={}",
            self.ctx.config.links.app_base_url.trim_end_matches('/'),
            secret.expose()
        );
        self.ctx.dispatcher.notify(Notification {
            event: format!("auth.verify:{}", member.id),
            audience: Audience::Addresses(vec![Recipient::named(address, member.name.clone())]),
            template: TemplateKey::AuthVerify,
            data: data([
                ("memberName", member.name.clone()),
                ("verificationUrl", verification_url),
                (
                    "expiresInSeconds",
                    self.ctx.config.tokens.email_verification_ttl.as_secs().to_string(),
                ),
            ]),
        });
    }
}
