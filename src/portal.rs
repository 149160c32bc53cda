use std::time::Duration;

use crate::config;

pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(15);

/// JSONP callback name the portal wraps its answers in.
const CALLBACK: &str = "dr1003";
const RESULT_OK_MARKER: &str = "\"result\":1";
const SUCCESS_MESSAGES: &[&str] = &["Portal协议认证成功", "认证成功"];
const ALREADY_ONLINE: &str = "已经在线";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Success(String),
    /// The portal already has a session for this address.
    AlreadyOnline(String),
    Failure(String),
}

impl LoginOutcome {
    /// The authenticated address, for both kinds of success.
    pub fn ip(&self) -> Option<&str> {
        match self {
            LoginOutcome::Success(ip) | LoginOutcome::AlreadyOnline(ip) => Some(ip),
            LoginOutcome::Failure(_) => None,
        }
    }
}

pub struct Portal {
    client: reqwest::Client,
    login_url: String,
    username: String,
    password: String,
}

impl Portal {
    pub fn from_config(network: &config::Network, credentials: &config::Credentials) -> Self {
        Self {
            client: reqwest::Client::new(),
            login_url: network.login_url.clone(),
            username: credentials.username.clone(),
            password: credentials.password.clone(),
        }
    }

    /// Query parameters in the order the portal's own login page sends them.
    fn params<'a>(&'a self, ip: &'a str, account: &'a str) -> [(&'static str, &'a str); 13] {
        [
            ("callback", CALLBACK),
            ("login_method", "1"),
            ("user_account", account),
            ("user_password", self.password.as_str()),
            ("wlan_user_ip", ip),
            ("wlan_user_ipv6", ""),
            ("wlan_user_mac", "000000000000"),
            ("wlan_ac_ip", "172.30.255.41"),
            ("wlan_ac_name", ""),
            ("jsVersion", "4.1.3"),
            ("terminal_type", "2"),
            ("lang", "zh-cn"),
            ("v", "795"),
        ]
    }

    /// Authenticates `ip` against the portal.
    ///
    /// Never fails: transport problems come back as `LoginOutcome::Failure`.
    pub async fn login(&self, ip: Option<&str>) -> LoginOutcome {
        let Some(ip) = ip else {
            tracing::error!("No campus IP address available, login aborted");
            return LoginOutcome::Failure("no-ip".to_string());
        };

        tracing::info!("Logging in to the portal as {} from {}", self.username, ip);
        let account = format!(",1,{}", self.username);
        let params = self.params(ip, &account);
        tracing::debug!(
            "Login parameters: {:?}",
            params
                .iter()
                .map(|(k, v)| if *k == "user_password" { (*k, "***") } else { (*k, *v) })
                .collect::<Vec<_>>()
        );

        let res = self
            .client
            .get(&self.login_url)
            .query(&params[..])
            .header(reqwest::header::ACCEPT, "*/*")
            .header(reqwest::header::ACCEPT_ENCODING, "gzip, deflate")
            .header(reqwest::header::ACCEPT_LANGUAGE, "zh-CN,zh;q=0.9")
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .header(reqwest::header::PRAGMA, "no-cache")
            .header(reqwest::header::REFERER, "http://172.30.255.42/")
            .timeout(LOGIN_TIMEOUT)
            .send()
            .await;

        let res = match res {
            Ok(res) => res,
            Err(why) if why.is_timeout() => {
                tracing::error!("Login request to {} timed out", self.login_url);
                return LoginOutcome::Failure(format!(
                    "login request timed out after {}s",
                    LOGIN_TIMEOUT.as_secs()
                ));
            }
            Err(why) => {
                tracing::error!("Login request failed: {:?}", why);
                return LoginOutcome::Failure(format!("login request failed: {why}"));
            }
        };

        let status = res.status();
        tracing::info!("Portal answered {}", status);
        let body = match res.text().await {
            Ok(body) => body,
            Err(why) => {
                tracing::error!("Failed to read portal response: {}", why);
                return LoginOutcome::Failure(format!("failed to read portal response: {why}"));
            }
        };
        tracing::debug!("Portal response body: {}", body);

        let outcome = classify(status, &body, ip);
        match &outcome {
            LoginOutcome::Success(_) => tracing::info!("Portal login succeeded"),
            LoginOutcome::AlreadyOnline(ip) => {
                tracing::warn!("Portal reports {} is already online, treating as success", ip)
            }
            LoginOutcome::Failure(reason) => tracing::error!("Portal login failed: {}", reason),
        }
        outcome
    }
}

/// Decides what a portal response means.
pub fn classify(status: reqwest::StatusCode, body: &str, ip: &str) -> LoginOutcome {
    if status == reqwest::StatusCode::OK
        && body.contains(RESULT_OK_MARKER)
        && SUCCESS_MESSAGES.iter().any(|msg| body.contains(msg))
    {
        return LoginOutcome::Success(ip.to_string());
    }

    if body.contains(ALREADY_ONLINE) {
        return LoginOutcome::AlreadyOnline(ip.to_string());
    }

    let mut reason = match unwrap_jsonp(body, CALLBACK)
        .and_then(|json| serde_json::from_str::<serde_json::Value>(json).ok())
        .and_then(|payload| failure_reason(&payload))
    {
        Some(reason) => reason,
        None if status != reqwest::StatusCode::OK => format!(
            "HTTP {} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        )
        .trim_end()
        .to_string(),
        None => "unrecognized portal response".to_string(),
    };

    if status == reqwest::StatusCode::BAD_GATEWAY {
        reason.push_str(" (gateway error: check that the campus IP is valid or retry later)");
    }

    LoginOutcome::Failure(reason)
}

/// `dr1003({...});` -> `{...}`
pub fn unwrap_jsonp<'a>(body: &'a str, callback: &str) -> Option<&'a str> {
    let body = body.trim();
    let body = body.strip_suffix(';').unwrap_or(body).trim_end();
    body.strip_prefix(callback)?
        .trim_start()
        .strip_prefix('(')?
        .strip_suffix(')')
}

fn failure_reason(payload: &serde_json::Value) -> Option<String> {
    if let Some(msg) = payload["msg"].as_str().filter(|msg| !msg.is_empty()) {
        return Some(msg.to_string());
    }
    match &payload["result"] {
        serde_json::Value::Null => None,
        result => Some(format!("Result: {result}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const IP: &str = "172.30.5.9";

    fn portal(login_url: String) -> Portal {
        Portal::from_config(
            &config::Network {
                login_url,
                check_url: "http://unused.invalid".to_string(),
            },
            &config::Credentials {
                username: "2024000000".to_string(),
                password: "hunter2".to_string(),
            },
        )
    }

    #[test]
    fn success_needs_result_marker_and_message() {
        let body = r#"dr1003({"result":1,"msg":"Portal协议认证成功！"});"#;
        assert_eq!(
            classify(StatusCode::OK, body, IP),
            LoginOutcome::Success(IP.to_string())
        );

        let body = r#"dr1003({"result":1,"msg":"认证成功"})"#;
        assert_eq!(
            classify(StatusCode::OK, body, IP),
            LoginOutcome::Success(IP.to_string())
        );
    }

    #[test]
    fn already_online_is_soft_success() {
        let body = r#"dr1003({"result":0,"msg":"IP: 172.30.5.9 已经在线！","ret_code":2})"#;
        assert_eq!(
            classify(StatusCode::OK, body, IP),
            LoginOutcome::AlreadyOnline(IP.to_string())
        );
    }

    #[test]
    fn failure_uses_portal_message() {
        let body = r#"dr1003({"result":0,"msg":"账号或密码错误","ret_code":1})"#;
        assert_eq!(
            classify(StatusCode::OK, body, IP),
            LoginOutcome::Failure("账号或密码错误".to_string())
        );
    }

    #[test]
    fn failure_without_message_reports_result() {
        let body = r#"dr1003({"result":0,"msg":""})"#;
        assert_eq!(
            classify(StatusCode::OK, body, IP),
            LoginOutcome::Failure("Result: 0".to_string())
        );
    }

    #[test]
    fn result_marker_without_success_message_is_failure() {
        let body = r#"dr1003({"result":1,"msg":"something else"})"#;
        assert_eq!(
            classify(StatusCode::OK, body, IP),
            LoginOutcome::Failure("something else".to_string())
        );
    }

    #[test]
    fn bad_gateway_is_annotated() {
        let LoginOutcome::Failure(reason) = classify(StatusCode::BAD_GATEWAY, "<html></html>", IP)
        else {
            panic!("502 must be a failure");
        };
        assert!(reason.starts_with("HTTP 502 Bad Gateway"));
        assert!(reason.contains("gateway error"));
    }

    #[test]
    fn unparseable_ok_body() {
        assert_eq!(
            classify(StatusCode::OK, "<html>portal</html>", IP),
            LoginOutcome::Failure("unrecognized portal response".to_string())
        );
    }

    #[test]
    fn jsonp_unwrapping() {
        assert_eq!(unwrap_jsonp("dr1003({\"a\":1})", CALLBACK), Some("{\"a\":1}"));
        assert_eq!(unwrap_jsonp("  dr1003({});\n", CALLBACK), Some("{}"));
        assert_eq!(unwrap_jsonp("jsonp123({})", CALLBACK), None);
        assert_eq!(unwrap_jsonp("dr1003{}", CALLBACK), None);
    }

    #[tokio::test]
    async fn missing_ip_fails_without_request() {
        let server = MockServer::start().await;
        let portal = portal(format!("{}/eportal/portal/login", server.uri()));

        assert_eq!(
            portal.login(None).await,
            LoginOutcome::Failure("no-ip".to_string())
        );
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn login_sends_vendor_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/eportal/portal/login"))
            .and(query_param("callback", "dr1003"))
            .and(query_param("login_method", "1"))
            .and(query_param("user_account", ",1,2024000000"))
            .and(query_param("user_password", "hunter2"))
            .and(query_param("wlan_user_ip", IP))
            .and(query_param("wlan_user_ipv6", ""))
            .and(query_param("wlan_user_mac", "000000000000"))
            .and(query_param("wlan_ac_ip", "172.30.255.41"))
            .and(query_param("wlan_ac_name", ""))
            .and(query_param("jsVersion", "4.1.3"))
            .and(query_param("terminal_type", "2"))
            .and(query_param("lang", "zh-cn"))
            .and(query_param("v", "795"))
            .and(header("Referer", "http://172.30.255.42/"))
            .and(header("Cache-Control", "no-cache"))
            .and(header("Pragma", "no-cache"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"dr1003({"result":1,"msg":"Portal协议认证成功！"});"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let portal = portal(format!("{}/eportal/portal/login", server.uri()));
        assert_eq!(
            portal.login(Some(IP)).await,
            LoginOutcome::Success(IP.to_string())
        );
    }

    #[tokio::test]
    async fn login_bad_gateway() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let portal = portal(format!("{}/eportal/portal/login", server.uri()));
        let outcome = portal.login(Some(IP)).await;
        assert!(matches!(outcome, LoginOutcome::Failure(reason) if reason.contains("502")));
    }

    #[tokio::test]
    async fn unreachable_portal_is_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let portal = portal(format!("http://{addr}/eportal/portal/login"));
        assert!(matches!(
            portal.login(Some(IP)).await,
            LoginOutcome::Failure(_)
        ));
    }
}
