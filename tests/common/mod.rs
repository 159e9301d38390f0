//! Scripted stand-ins for the Qube Mesh pages the agents talk to.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use qubemesh_e2e::events::parse_event_count;
use qubemesh_e2e::scripted::{install_calendar, DriverCall, Dom, Node, ScriptedDriver};
use qubemesh_e2e::workflow::{AgentContext, WorkflowRunner};
use qubemesh_e2e::{AgentVariant, ArtifactStore, EnvConfig, Harness, RunReport, Timeouts};

pub fn config(extra: &[(&str, &str)]) -> EnvConfig {
    let mut vars: HashMap<String, String> = [
        ("BASE_URL", "https://app.example.com/login"),
        ("USER_ID", "e2e.user"),
        ("PASSWORD", "secret"),
        ("QUBE_MESH_URL", "https://app.example.com/#/home"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    for (k, v) in extra {
        vars.insert(k.to_string(), v.to_string());
    }
    EnvConfig::from_lookup(|k: &str| vars.get(k).cloned()).unwrap()
}

pub fn harness(driver: &Arc<ScriptedDriver>) -> Harness {
    Harness::new(driver.clone(), Timeouts::default())
}

pub async fn run(
    variant: AgentVariant,
    driver: &Arc<ScriptedDriver>,
    cfg: &EnvConfig,
    store: Option<Arc<dyn ArtifactStore>>,
) -> RunReport {
    let h = harness(driver);
    let ctx = AgentContext { agent_name: cfg.agent_name(variant.index()).to_string(), agent_index: variant.index() };
    let workflow = variant.workflow(&h.timeouts);
    let mut runner = WorkflowRunner::new(&h, cfg);
    if let Some(store) = store {
        runner = runner.with_artifacts(store);
    }
    runner.run(&workflow, &ctx).await
}

pub fn clicked(driver: &ScriptedDriver) -> Vec<String> {
    driver
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            DriverCall::Click { id, .. } => Some(id),
            DriverCall::MouseClick { hit: Some(id), .. } => Some(id),
            _ => None,
        })
        .collect()
}

pub fn fills(driver: &ScriptedDriver) -> Vec<(String, String)> {
    driver
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            DriverCall::Fill { id, text } => Some((id, text)),
            _ => None,
        })
        .collect()
}

// ========================= Page Pieces =========================

pub fn bump_events(dom: &mut Dom) {
    let n = dom.get("badge").and_then(|b| parse_event_count(&b.text)).unwrap_or(0);
    dom.set_text("badge", &format!("AI Events ({})", n + 1));
}

fn say(dom: &mut Dom, id: &str, text: &str) {
    dom.add(Node::new(id).text(text));
}

fn button(id: &str, name: &str) -> Node {
    Node::new(id).role("button").name(name).css("button")
}

/// Prompt box plus the events badge.
pub fn chat_page(dom: &mut Dom) {
    dom.add(Node::new("prompt").role("textbox").name("Prompt"));
    dom.add(Node::new("badge").text("AI Events (0)"));
}

/// Agents 4 and 5: any message gets an answer unless `silent`, which also
/// drops the events badge.
pub fn query_app(dom: &mut Dom, silent: bool) {
    if silent {
        dom.add(Node::new("prompt").role("textbox").name("Prompt"));
        return;
    }
    chat_page(dom);
    dom.on_press("prompt", "Enter", |dom| {
        say(dom, "answer", "Here is what I found.");
        bump_events(dom);
    });
}

/// Agent 1: supplier grid, proceed, reasons, create.
pub fn offboard_app(dom: &mut Dom) {
    chat_page(dom);
    dom.on_press("prompt", "Enter", |dom| {
        dom.add(Node::new("grid").role("grid"));
        dom.add(Node::new("hdr").role("columnheader").name("Supplier Name").parent("grid"));
        for n in 1..=2 {
            let row = format!("row{n}");
            dom.add(Node::new(&row).role("row").name("Press Space to select this row").parent("grid"));
            dom.add(Node::new(&format!("cb{n}")).role("checkbox").css("input[type=\"checkbox\"]").parent(&row));
        }
    });
    dom.on_click("cb1", |dom| dom.add(button("proceed", "Proceed")));
    dom.on_click("proceed", |dom| dom.add(button("pwr", "Proceed with request")));
    dom.on_click("pwr", |dom| {
        dom.add(button("r1", "No longer doing business"));
        dom.add(button("r2", "Not approved by TPRM"));
        dom.add(button("r3", "Quick setup and pay"));
    });
    for reason in ["r1", "r2", "r3"] {
        dom.on_click(reason, |dom| dom.add(button("create", "Create request")));
    }
}

/// Agent 2: amendment conversation. Without `discussion` the assistant never
/// asks whether the supplier was consulted.
pub fn amend_app(dom: &mut Dom, discussion: bool) {
    chat_page(dom);
    dom.on_press("prompt", "Enter", |dom| {
        let message = dom.value("prompt").unwrap_or_default().to_string();
        bump_events(dom);
        if message.starts_with("Yes, I have discussed") {
            dom.add(Node::new("reason-dd").role("listbox").name("Amendment Reason").rect(100.0, 200.0, 300.0, 40.0));
        } else if message.starts_with("Description:") {
            dom.add(Node::new("card0"));
            dom.add(button("yes0", "Yes").parent("card0").disabled());
            dom.add(Node::new("card1"));
            dom.add(Node::new("q-time").text("Is there any change in the type or volume of data being shared?").parent("card1"));
            dom.add(button("yes1", "Yes").parent("card1"));
            dom.add(button("no1", "No").parent("card1"));
        } else {
            dom.add(button("pwr", "Proceed with request"));
        }
    });
    dom.on_click("pwr", move |dom| {
        bump_events(dom);
        if discussion {
            say(dom, "q-discuss", "Have you discussed this amendment with the supplier?");
        }
    });
    dom.on_click("reason-dd", |dom| {
        dom.add(Node::new("opt1").role("option").name("Change in scope"));
        dom.add(Node::new("opt2").role("option").name("Change in pricing"));
        dom.add(Node::new("opt3").role("option").name("Extension of term"));
    });
    for opt in ["opt1", "opt2", "opt3"] {
        dom.on_click(opt, move |dom| {
            let picked = dom.get(opt).map(|n| n.text.clone()).unwrap_or_default();
            for o in ["opt1", "opt2", "opt3"] {
                dom.remove(o);
            }
            dom.set_text("reason-dd", &picked);
            dom.add(button("proceed", "Proceed"));
        });
    }
    dom.on_click("proceed", |dom| {
        bump_events(dom);
        say(dom, "q-desc", "Noted. Please provide brief description for the amendment.");
    });
    dom.on_click("yes1", |dom| {
        bump_events(dom);
        dom.set_enabled("yes1", false);
        dom.add(Node::new("card2"));
        dom.add(Node::new("q-products").text("Are there significant changes in products or services?").parent("card2"));
        dom.add(button("yes2", "Yes").parent("card2"));
    });
    dom.on_click("yes2", |dom| {
        bump_events(dom);
        say(dom, "summary", "Here's a quick summary of your amendment request.");
        dom.add(button("create", "Create request"));
    });
    dom.on_click("create", |dom| {
        bump_events(dom);
        dom.add(button("validate", "Send for validation"));
    });
}

/// Agent 3: termination conversation. The calendar opens on `shown`.
pub fn terminate_app(dom: &mut Dom, shown: NaiveDate) {
    chat_page(dom);
    dom.on_press("prompt", "Enter", |dom| {
        bump_events(dom);
        say(dom, "q-proceed", "Would you like to proceed with the termination request?");
        dom.add(button("pwr", "Proceed with request"));
    });
    dom.on_click("pwr", |dom| {
        bump_events(dom);
        say(dom, "q-mode", "How would you like to proceed with the termination?");
        dom.add(button("now", "Terminate immediately"));
        dom.add(button("later", "Terminate for a future date"));
    });
    dom.on_click("now", ask_reason);
    dom.on_click("later", move |dom| {
        bump_events(dom);
        say(dom, "q-date", "Please capture the new contract termination date.");
        dom.add(Node::new("date-input").role("textbox").placeholder("DD/MM/YYYY").css("[placeholder*=\"DD/MM/YYYY\"]"));
        dom.add(button("proceed", "Proceed"));
        install_calendar(dom, "date-input", shown);
    });
    dom.on_click("proceed", ask_reason);
    for reason in ["cause", "convenience"] {
        dom.on_click(reason, |dom| {
            bump_events(dom);
            say(dom, "q-create", "Would you like to create the project request with these details?");
            dom.add(button("create", "Create request"));
        });
    }
    dom.on_click("create", |dom| {
        bump_events(dom);
        dom.add(button("validate", "Send for validation"));
    });
}

fn ask_reason(dom: &mut Dom) {
    bump_events(dom);
    say(dom, "q-reason", "What is the reason for terminating this contract?");
    dom.add(button("cause", "Termination for cause"));
    dom.add(button("convenience", "Termination for convenience"));
}

/// Login form: "Login with password" reveals the password field; `accept`
/// decides whether submitting leaves the login page.
pub fn login_page(dom: &mut Dom, accept: bool) {
    dom.on_goto(|dom| {
        dom.add(Node::new("user").role("textbox").name("User ID"));
        dom.add(button("pwmode", "Login with password"));
    });
    dom.on_click("pwmode", |dom| {
        dom.remove("pwmode");
        dom.add(Node::new("password").label("Password").css("input[type=\"password\"]"));
        dom.add(button("login", "Login"));
    });
    dom.on_click("login", move |dom| {
        if !accept {
            say(dom, "login-error", "Invalid credentials");
            return;
        }
        for id in ["user", "password", "login"] {
            dom.remove(id);
        }
        dom.set_url("https://app.example.com/#/home");
        dom.add(button("logout", "Log out"));
        dom.set_session(qubemesh_e2e::SessionState {
            cookies: vec![qubemesh_e2e::session::Cookie {
                name: "sid".into(),
                value: "abc123".into(),
                domain: "app.example.com".into(),
                path: "/".into(),
                expires: -1.0,
                http_only: true,
                secure: true,
                same_site: Some("Lax".into()),
            }],
            origins: vec![qubemesh_e2e::session::OriginState {
                origin: "https://app.example.com".into(),
                local_storage: vec![qubemesh_e2e::session::StorageItem { name: "token".into(), value: "t0k".into() }],
            }],
        });
    });
}

/// Qube Mesh shell: Auto Invoke in a frame, then the agent list; picking an
/// agent installs `chat`.
pub fn mesh_shell(dom: &mut Dom, chat: fn(&mut Dom)) {
    dom.on_goto(|dom| {
        dom.add(Node::new("invoke").role("button").name("Auto Invoke").frame("mesh"));
    });
    dom.on_click("invoke", |dom| {
        dom.add(Node::new("search").role("textbox").name("Agent search"));
        for n in 1..=5 {
            dom.add(button(&format!("agent{n}"), &format!("Agent {n}")));
        }
    });
    for n in 1..=5 {
        dom.on_click(&format!("agent{n}"), move |dom| chat(dom));
    }
}

pub fn driver_with(setup: impl FnOnce(&mut Dom)) -> Arc<ScriptedDriver> {
    let driver = Arc::new(ScriptedDriver::new());
    driver.with_dom(setup);
    driver
}
