//! One-time token lifecycle: the four email flows, the single-use
//! guarantee under concurrency, and the anti-enumeration responses.

mod common;

use common::*;
use uoa_service::error::{ErrorCode, ServiceError};
use uoa_service::services::LoginOutcome;
use uoa_service::utils::Password;

#[tokio::test]
async fn registration_response_is_identical_for_existing_and_unknown_addresses() {
    let app = TestApp::spawn();
    let config = tenant_config();
    seed_password_user(&app, "taken@example.com", "hunter2 hunter2").await;

    let existing = app
        .ctx
        .one_time
        .request_email_verification("taken@example.com", &config, CONFIG_URL)
        .await
        .unwrap();
    let unknown = app
        .ctx
        .one_time
        .request_email_verification("fresh@example.com", &config, CONFIG_URL)
        .await
        .unwrap();

    assert_eq!(existing, unknown);
    assert_eq!(existing.message, unknown.message);
}

#[tokio::test]
async fn reset_request_acks_identically_whether_or_not_the_account_exists() {
    let app = TestApp::spawn();
    let config = tenant_config();
    seed_password_user(&app, "alice@example.com", "correct horse").await;

    let known = app
        .ctx
        .one_time
        .request_password_reset("alice@example.com", &config, CONFIG_URL)
        .await
        .unwrap();
    let unknown = app
        .ctx
        .one_time
        .request_password_reset("nobody@example.com", &config, CONFIG_URL)
        .await
        .unwrap();

    assert_eq!(known, unknown);
    // Only the real account got mail; the response never says so.
    assert_eq!(app.mailer.sent_to("alice@example.com").len(), 1);
    assert!(app.mailer.sent_to("nobody@example.com").is_empty());
}

#[tokio::test]
async fn login_link_flow_signs_the_user_in() {
    let app = TestApp::spawn();
    let config = tenant_config();
    let user = seed_password_user(&app, "alice@example.com", "correct horse").await;

    app.ctx
        .one_time
        .request_login_link("alice@example.com", &config, CONFIG_URL)
        .await
        .unwrap();
    let raw = token_from_email(&app.last_email_to("alice@example.com").text);

    let logged_in = app.ctx.one_time.consume_login_link(&raw, CONFIG_URL).await.unwrap();
    assert_eq!(logged_in.id, user.id);

    let outcome = app
        .ctx
        .authn
        .login_link_authenticated(logged_in, &config, CONFIG_URL, None)
        .await
        .unwrap();
    let LoginOutcome::Redirect { redirect_to } = outcome else {
        panic!("login link should complete into a redirect");
    };
    let code = code_from_redirect(&redirect_to);
    assert!(app.ctx.tokens.exchange_code(&code, &config, CONFIG_URL).await.is_ok());
}

#[tokio::test]
async fn password_reset_flow_replaces_the_password() {
    let app = TestApp::spawn();
    let config = tenant_config();
    seed_password_user(&app, "alice@example.com", "old password").await;

    app.ctx
        .one_time
        .request_password_reset("alice@example.com", &config, CONFIG_URL)
        .await
        .unwrap();
    let raw = token_from_email(&app.last_email_to("alice@example.com").text);

    app.ctx
        .one_time
        .consume_password_reset(&raw, CONFIG_URL, Password::new("new password".into()))
        .await
        .unwrap();

    assert!(app
        .ctx
        .authn
        .password_login(
            "alice@example.com",
            Password::new("old password".into()),
            &config,
            CONFIG_URL,
            None,
        )
        .await
        .is_err());
    assert!(app
        .ctx
        .authn
        .password_login(
            "alice@example.com",
            Password::new("new password".into()),
            &config,
            CONFIG_URL,
            None,
        )
        .await
        .is_ok());
}

#[tokio::test]
async fn passwordless_registration_creates_the_user_on_consumption() {
    let app = TestApp::spawn();
    let config = tenant_config();

    app.ctx
        .one_time
        .request_email_verification("fresh@example.com", &config, CONFIG_URL)
        .await
        .unwrap();
    let raw = token_from_email(&app.last_email_to("fresh@example.com").text);

    let user = app
        .ctx
        .one_time
        .consume_email_verification(&raw, &config, CONFIG_URL, None)
        .await
        .unwrap();
    assert_eq!(user.email, "fresh@example.com");
    assert!(!user.has_password());
}

#[tokio::test]
async fn set_password_registration_verifies_and_sets_in_one_step() {
    let app = TestApp::spawn();
    let mut config = tenant_config();
    config.registration.set_password = true;

    app.ctx
        .one_time
        .request_email_verification("fresh@example.com", &config, CONFIG_URL)
        .await
        .unwrap();
    let raw = token_from_email(&app.last_email_to("fresh@example.com").text);

    let user = app
        .ctx
        .one_time
        .consume_email_verification(
            &raw,
            &config,
            CONFIG_URL,
            Some(Password::new("chosen password".into())),
        )
        .await
        .unwrap();
    assert!(user.has_password());

    assert!(app
        .ctx
        .authn
        .password_login(
            "fresh@example.com",
            Password::new("chosen password".into()),
            &config,
            CONFIG_URL,
            None,
        )
        .await
        .is_ok());
}

#[tokio::test]
async fn verify_email_token_never_overwrites_an_existing_password() {
    let app = TestApp::spawn();
    let mut config = tenant_config();
    config.registration.set_password = true;

    // Token issued while the address had no account...
    app.ctx
        .one_time
        .request_email_verification("late@example.com", &config, CONFIG_URL)
        .await
        .unwrap();
    let raw = token_from_email(&app.last_email_to("late@example.com").text);

    // ...but a password-bearing account appears before consumption.
    seed_password_user(&app, "late@example.com", "established password").await;

    let err = app
        .ctx
        .one_time
        .consume_email_verification(
            &raw,
            &config,
            CONFIG_URL,
            Some(Password::new("attacker password".into())),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::PasswordAlreadySet);

    // The established password still works; the attempted one does not.
    assert!(app
        .ctx
        .authn
        .password_login(
            "late@example.com",
            Password::new("established password".into()),
            &config,
            CONFIG_URL,
            None,
        )
        .await
        .is_ok());
    assert!(app
        .ctx
        .authn
        .password_login(
            "late@example.com",
            Password::new("attacker password".into()),
            &config,
            CONFIG_URL,
            None,
        )
        .await
        .is_err());
}

#[tokio::test]
async fn concurrent_consumption_succeeds_exactly_once() {
    let app = TestApp::spawn();
    let config = tenant_config();
    seed_password_user(&app, "alice@example.com", "correct horse").await;

    app.ctx
        .one_time
        .request_login_link("alice@example.com", &config, CONFIG_URL)
        .await
        .unwrap();
    let raw = token_from_email(&app.last_email_to("alice@example.com").text);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let one_time = app.ctx.one_time.clone();
        let raw = raw.clone();
        handles.push(tokio::spawn(async move {
            one_time.consume_login_link(&raw, CONFIG_URL).await
        }));
    }

    let mut successes = 0;
    let mut already_used = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(err) => {
                assert_eq!(err.code(), ErrorCode::TokenAlreadyUsed);
                already_used += 1;
            }
        }
    }
    assert_eq!(successes, 1);
    assert_eq!(already_used, 7);
}

#[tokio::test]
async fn expired_token_is_rejected_with_a_generic_response() {
    let app = TestApp::spawn();
    let config = tenant_config();
    seed_password_user(&app, "alice@example.com", "correct horse").await;

    app.ctx
        .one_time
        .request_login_link("alice@example.com", &config, CONFIG_URL)
        .await
        .unwrap();
    let raw = token_from_email(&app.last_email_to("alice@example.com").text);

    app.clock.advance(chrono::Duration::minutes(16));
    let err = app.ctx.one_time.consume_login_link(&raw, CONFIG_URL).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::TokenExpired);

    // Expired, used and unknown all read the same from outside.
    let unknown = app
        .ctx
        .one_time
        .consume_login_link("0000deadbeef", CONFIG_URL)
        .await
        .unwrap_err();
    assert_eq!(err.public_message(), unknown.public_message());
}

#[tokio::test]
async fn token_is_bound_to_its_tenant_context() {
    let app = TestApp::spawn();
    let config = tenant_config();
    seed_password_user(&app, "alice@example.com", "correct horse").await;

    app.ctx
        .one_time
        .request_login_link("alice@example.com", &config, CONFIG_URL)
        .await
        .unwrap();
    let raw = token_from_email(&app.last_email_to("alice@example.com").text);

    let err = app
        .ctx
        .one_time
        .consume_login_link(&raw, "https://other-tenant.example/uoa.json")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::BadRequest(..)));

    assert!(app.ctx.one_time.consume_login_link(&raw, CONFIG_URL).await.is_ok());
}

#[tokio::test]
async fn two_fa_reset_flow_disables_two_fa() {
    let app = TestApp::spawn();
    let config = tenant_config();
    let user = seed_password_user(&app, "alice@example.com", "correct horse").await;

    // Enroll 2FA properly so the account is protected.
    use uoa_service::services::two_factor::{totp_at, TotpAlgorithm, DEFAULT_DIGITS, DEFAULT_PERIOD};
    use uoa_service::utils::encoding::base32_decode;
    use uoa_service::utils::Clock;

    let (secret, _) = app.ctx.two_fa.start_enrollment(&user).await.unwrap();
    let code = totp_at(
        &base32_decode(&secret).unwrap(),
        app.clock.unix_seconds(),
        TotpAlgorithm::Sha1,
        DEFAULT_DIGITS,
        DEFAULT_PERIOD,
    );
    app.ctx.two_fa.confirm_enrollment(user.id, &code).await.unwrap();

    app.ctx
        .one_time
        .request_two_fa_reset("alice@example.com", &config, CONFIG_URL)
        .await
        .unwrap();
    let raw = token_from_email(&app.last_email_to("alice@example.com").text);

    let after = app.ctx.one_time.consume_two_fa_reset(&raw, CONFIG_URL).await.unwrap();
    assert!(!after.two_fa_enabled);
    assert!(after.two_fa_secret.is_none());

    // Login is back to a plain redirect, no challenge.
    let outcome = app
        .ctx
        .authn
        .password_login(
            "alice@example.com",
            Password::new("correct horse".into()),
            &config,
            CONFIG_URL,
            None,
        )
        .await
        .unwrap();
    assert!(matches!(outcome, LoginOutcome::Redirect { .. }));
}

#[tokio::test]
async fn closed_registration_rejects_without_leaking_account_state() {
    let app = TestApp::spawn();
    let mut config = tenant_config();
    config.registration.mode = uoa_service::models::RegistrationMode::Closed;
    seed_password_user(&app, "taken@example.com", "hunter2 hunter2").await;

    let existing = app
        .ctx
        .one_time
        .request_email_verification("taken@example.com", &config, CONFIG_URL)
        .await
        .unwrap_err();
    let unknown = app
        .ctx
        .one_time
        .request_email_verification("fresh@example.com", &config, CONFIG_URL)
        .await
        .unwrap_err();

    assert_eq!(existing.public_message(), unknown.public_message());
    assert_eq!(existing.code(), ErrorCode::RegistrationClosed);
    assert_eq!(unknown.code(), ErrorCode::RegistrationClosed);
}
