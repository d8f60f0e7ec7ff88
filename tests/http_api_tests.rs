//! HTTP-level tests: the literal protocol flows, driven with reqwest
//! against a server bound to an ephemeral port.

use std::time::Duration;

use serde_json::Value;

use shellmux::config::{Config, ShellTypeRegistry};
use shellmux::manager::ShellManager;
use shellmux::server;

const USER_HEADER: &str = "X-Remote-User";
const TAB_HEADER: &str = "Hue-Instance-ID";

async fn start_server() -> String {
    let config: Config = toml::from_str(
        r#"
        [[shell]]
        nice_name = "Pig Shell (Grunt)"
        key_name = "pig"
        command = "/bin/sh -c 'printf hi; cat'"
        "#,
    )
    .unwrap();
    let handle = ShellManager::start(ShellTypeRegistry::from_config(&config).unwrap());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::run_server(listener, handle));
    format!("http://{addr}")
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap()
}

#[tokio::test]
async fn requests_without_identity_are_not_logged_in() {
    let base = start_server().await;
    let body: Value = client()
        .get(format!("{base}/shell/get_shell_types"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["notLoggedIn"], Value::Bool(true));
}

#[tokio::test]
async fn shell_types_listing() {
    let base = start_server().await;
    let body: Value = client()
        .get(format!("{base}/shell/get_shell_types"))
        .header(USER_HEADER, "a")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["success"], Value::Bool(true));
    assert_eq!(body["shellTypes"][0]["keyName"], "pig");
    assert_eq!(body["shellTypes"][0]["niceName"], "Pig Shell (Grunt)");
}

#[tokio::test]
async fn create_poll_command_kill_flow() {
    let base = start_server().await;
    let client = client();

    // 1. Create a pig shell.
    let body: Value = client
        .post(format!("{base}/shell/create"))
        .header(USER_HEADER, "a")
        .form(&[("keyName", "pig")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["success"], Value::Bool(true));
    assert_eq!(body["shellId"], "0");

    // 2. Poll from offset 0; the greeting resolves it.
    let body: Value = client
        .post(format!("{base}/shell/retrieve_output"))
        .header(USER_HEADER, "a")
        .header(TAB_HEADER, "T1")
        .form(&[("numPairs", "1"), ("shellId1", "0"), ("offset1", "0")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let inner = &body["0"];
    assert!(
        inner["alive"] == Value::Bool(true) || inner["exited"] == Value::Bool(true),
        "got: {body}"
    );
    let output = inner["output"].as_str().unwrap();
    assert!(output.contains("hi"), "got: {output:?}");
    let next_offset = inner["nextOffset"].as_u64().unwrap().to_string();

    // 3. Send a command; the ack arrives once the pty takes the bytes.
    let body: Value = client
        .post(format!("{base}/shell/process_command"))
        .header(USER_HEADER, "a")
        .form(&[("shellId", "0"), ("lineToSend", "asdf")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["success"], Value::Bool(true));

    // The next poll at the previous offset carries the echoed text.
    let body: Value = client
        .post(format!("{base}/shell/retrieve_output"))
        .header(USER_HEADER, "a")
        .header(TAB_HEADER, "T1")
        .form(&[
            ("numPairs", "1"),
            ("shellId1", "0"),
            ("offset1", next_offset.as_str()),
        ])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(
        body["0"]["output"].as_str().unwrap().contains("asdf"),
        "got: {body}"
    );

    // 4. Restore returns the whole transcript and the command history.
    let body: Value = client
        .post(format!("{base}/shell/restore_shell"))
        .header(USER_HEADER, "a")
        .form(&[("shellId", "0")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["success"], Value::Bool(true));
    assert!(body["output"].as_str().unwrap().contains("hi"));
    assert_eq!(body["commands"][0], "asdf");
}

#[tokio::test]
async fn kill_resolves_a_parked_poll_with_shell_killed() {
    let base = start_server().await;
    let client = client();

    let body: Value = client
        .post(format!("{base}/shell/create"))
        .header(USER_HEADER, "a")
        .form(&[("keyName", "pig")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["success"], Value::Bool(true));

    // Drain the banner; the shell produces nothing further until fed, so
    // a poll at nextOffset stays parked.
    let body: Value = client
        .post(format!("{base}/shell/retrieve_output"))
        .header(USER_HEADER, "a")
        .header(TAB_HEADER, "T1")
        .form(&[("numPairs", "1"), ("shellId1", "0"), ("offset1", "0")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let drained = body["0"]["nextOffset"].as_u64().unwrap().to_string();

    let parked = tokio::spawn(
        client
            .post(format!("{base}/shell/retrieve_output"))
            .header(USER_HEADER, "a")
            .header(TAB_HEADER, "T1")
            .form(&[
                ("numPairs", "1"),
                ("shellId1", "0"),
                ("offset1", drained.as_str()),
            ])
            .send(),
    );
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Kill answers with an empty body; the next periodic tick destroys
    // the shell and resolves the parked poll.
    let response = client
        .post(format!("{base}/shell/kill_shell"))
        .header(USER_HEADER, "a")
        .form(&[("shellId", "0")])
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    assert_eq!(response.text().await.unwrap(), "");

    let body: Value = parked.await.unwrap().unwrap().json().await.unwrap();
    assert_eq!(body["0"]["shellKilled"], Value::Bool(true), "got: {body}");

    // The shell is gone afterwards.
    let body: Value = client
        .post(format!("{base}/shell/restore_shell"))
        .header(USER_HEADER, "a")
        .form(&[("shellId", "0")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["shellKilled"], Value::Bool(true));
}

#[tokio::test]
async fn polling_without_the_tab_header_yields_an_empty_body() {
    let base = start_server().await;
    let response = client()
        .post(format!("{base}/shell/retrieve_output"))
        .header(USER_HEADER, "a")
        .form(&[("numPairs", "1"), ("shellId1", "0"), ("offset1", "0")])
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    assert_eq!(response.text().await.unwrap(), "");
}

#[tokio::test]
async fn duplicated_tab_headers_are_rejected() {
    let base = start_server().await;
    let response = client()
        .post(format!("{base}/shell/retrieve_output"))
        .header(USER_HEADER, "a")
        .header(TAB_HEADER, "T1")
        .header(TAB_HEADER, "T2")
        .form(&[("numPairs", "1"), ("shellId1", "0"), ("offset1", "0")])
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    assert_eq!(response.text().await.unwrap(), "");
}

#[tokio::test]
async fn add_to_output_always_acks() {
    let base = start_server().await;
    let client = client();
    let body: Value = client
        .post(format!("{base}/shell/create"))
        .header(USER_HEADER, "a")
        .form(&[("keyName", "pig")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["success"], Value::Bool(true));

    let body: Value = client
        .post(format!("{base}/shell/add_to_output"))
        .header(USER_HEADER, "a")
        .header(TAB_HEADER, "T1")
        .form(&[("numPairs", "1"), ("shellId1", "0"), ("offset1", "0")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["success"], Value::Bool(true));
}
