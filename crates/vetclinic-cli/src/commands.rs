//! Command implementations. Each prints its result to stdout.

use std::io::{self, BufRead, Write};

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;
use tracing::warn;

use vetclinic_core::api::{ApiRequest, Method, Resource};
use vetclinic_core::config::{Config, Settings};
use vetclinic_core::{ApiClient, ApiError, AuthStatus, Page, Role, User};

const ENV_USERNAME: &str = "VETCLINIC_USERNAME";
const ENV_PASSWORD: &str = "VETCLINIC_PASSWORD";

/// Roles allowed to delete records. The server enforces its own rules; this
/// only avoids sending requests that are bound to be refused.
const DELETE_ROLES: &[Role] = &[Role::Admin];

pub async fn login(client: &ApiClient, config: &mut Config, username: Option<String>) -> Result<()> {
    let username = match username
        .or_else(|| std::env::var(ENV_USERNAME).ok())
        .or_else(|| config.last_username.clone())
    {
        Some(username) => username,
        None => prompt("Username: ")?,
    };
    if username.is_empty() {
        bail!("Username is required");
    }

    let password = match std::env::var(ENV_PASSWORD) {
        Ok(password) => password,
        Err(_) => rpassword::prompt_password(format!("Password for {}: ", username))
            .context("Failed to read password")?,
    };

    let user = client.login(&username, &password).await.map_err(|e| {
        if e.downcast_ref::<ApiError>().is_some_and(ApiError::is_auth_failure) {
            anyhow!("Invalid username or password")
        } else {
            e
        }
    })?;

    config.last_username = Some(username);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to remember username");
    }

    println!("Logged in as {}", describe_user(&user));
    Ok(())
}

pub async fn logout(client: &ApiClient) -> Result<()> {
    if !client.session().is_authenticated() {
        println!("Not logged in");
        return Ok(());
    }
    client.logout().await?;
    println!("Logged out");
    Ok(())
}

pub async fn whoami(client: &ApiClient) -> Result<()> {
    let user = client.verify().await?;
    println!("{}", describe_user(&user));
    if let Some(ref email) = user.email {
        println!("  email: {}", email);
    }
    Ok(())
}

/// Local session state only; never touches the network.
pub fn status(client: &ApiClient, settings: &Settings) -> Result<()> {
    let session = client.session();
    let state = match session.auth_status() {
        AuthStatus::Authenticated => "authenticated",
        AuthStatus::Anonymous => "not logged in",
        AuthStatus::Unknown => "unknown",
    };

    println!("API:      {}", settings.api_url);
    println!("Session:  {}", state);
    println!("Storage:  {}", session.storage_location());
    if let Some(user) = session.user() {
        println!("User:     {}", describe_user(&user));
        println!("Admin:    {}", if user.is_admin() { "yes" } else { "no" });
    }
    if let Some(saved_at) = session.snapshot().saved_at {
        println!("Saved at: {}", saved_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    Ok(())
}

pub async fn list(client: &ApiClient, resource: Resource, query: &[(String, String)]) -> Result<()> {
    let query: Vec<(&str, &str)> = query.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    let page: Page<Value> = client.resource(resource).list_query(&query).await?;

    print_json(&Value::Array(page.results.clone()))?;
    eprintln!("{} of {} {}", page.len(), page.count, resource);
    if let Some(ref next) = page.next {
        eprintln!("More results: {}", next);
    }
    Ok(())
}

pub async fn show(client: &ApiClient, resource: Resource, id: &str) -> Result<()> {
    let item: Value = client.resource(resource).get(id).await?;
    print_json(&item)
}

pub async fn delete(client: &ApiClient, resource: Resource, id: &str) -> Result<()> {
    require_any_role(client.session().user().as_ref(), DELETE_ROLES, "delete records")?;
    client.resource(resource).delete(id).await?;
    println!("Deleted {} {}", resource, id);
    Ok(())
}

/// Raw call through the authenticated pipeline.
pub async fn request(client: &ApiClient, method: &str, path: &str, body: Option<Value>) -> Result<()> {
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| anyhow!("Invalid HTTP method '{}'", method))?;

    let mut request = ApiRequest::new(method, path);
    if let Some(body) = body {
        request = request.with_body(body);
    }

    let response = client.execute(request).await?;
    eprintln!("{}", response.status);
    if response.body.trim().is_empty() {
        return Ok(());
    }
    match serde_json::from_str::<Value>(&response.body) {
        Ok(json) => print_json(&json),
        Err(_) => {
            println!("{}", response.body);
            Ok(())
        }
    }
}

/// Refuse an action locally when the logged-in user lacks every role in
/// `roles`. Without a user the request goes out and the server answers.
fn require_any_role(user: Option<&User>, roles: &[Role], action: &str) -> Result<()> {
    match user {
        Some(user) if !user.has_any_role(roles) => {
            let names = roles.iter().map(Role::as_str).collect::<Vec<_>>().join(" or ");
            bail!("Only {} users may {}", names, action)
        }
        _ => Ok(()),
    }
}

fn describe_user(user: &User) -> String {
    let roles = user
        .roles
        .iter()
        .map(|r| r.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    if roles.is_empty() {
        format!("{} ({})", user.display_name(), user.username)
    } else {
        format!("{} ({}) [{}]", user.display_name(), user.username, roles)
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(roles: Vec<Role>) -> User {
        User {
            id: 4,
            username: "mgarcia".to_string(),
            email: None,
            first_name: Some("Marta".to_string()),
            last_name: Some("Garcia".to_string()),
            roles,
        }
    }

    #[test]
    fn test_describe_user() {
        assert_eq!(describe_user(&user(vec![])), "Marta Garcia (mgarcia)");
        assert_eq!(
            describe_user(&user(vec![Role::Receptionist, Role::Admin])),
            "Marta Garcia (mgarcia) [receptionist, admin]"
        );
    }

    #[test]
    fn test_delete_requires_admin() {
        let admin = user(vec![Role::Admin]);
        let receptionist = user(vec![Role::Receptionist]);

        assert!(require_any_role(Some(&admin), DELETE_ROLES, "delete records").is_ok());
        let err = require_any_role(Some(&receptionist), DELETE_ROLES, "delete records")
            .expect_err("refused");
        assert_eq!(err.to_string(), "Only admin users may delete records");
        // Anonymous callers are left to the server
        assert!(require_any_role(None, DELETE_ROLES, "delete records").is_ok());
    }
}
