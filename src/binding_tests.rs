//! Binding evaluation against live component frames.

use std::sync::Arc;

use serde_json::json;

use crate::template::TemplateSource as T;
use crate::{
    Application, Binding, Component, ComponentClass, Environment, FieldTable, Frame, Request,
    RuntimeConfig, RuntimeError, Scope, StringTables, Value,
};

#[derive(Default)]
struct Host {
    title: String,
    count: i64,
    flag: bool,
    profile: Value,
}

impl Component for Host {}

#[derive(Default)]
struct Card;

impl Component for Card {}

fn host_class() -> ComponentClass {
    ComponentClass::new::<Host>("Host")
        .fields(
            FieldTable::builder::<Host>()
                .field("title", |h| json!(h.title), |h, v| {
                    h.title = v.as_str().ok_or("title must be text")?.to_string();
                    Ok(())
                })
                .field("count", |h| json!(h.count), |h, v| {
                    h.count = v.as_i64().ok_or("count must be an integer")?;
                    Ok(())
                })
                .field("flag", |h| json!(h.flag), |h, v| {
                    h.flag = v.as_bool().ok_or("flag must be a boolean")?;
                    Ok(())
                })
                .field("profile", |h| h.profile.clone(), |h, v| {
                    h.profile = v;
                    Ok(())
                })
                .read_only("nickname", |_| Value::Null)
                .build(),
        )
        .template(vec![
            T::component("Card", &[("title", "$title")], vec![]),
            T::component("Card", &[], vec![]),
        ])
}

fn card_class() -> ComponentClass {
    ComponentClass::new::<Card>("Card").template(vec![
        T::component("String", &[("value", "$^title:untitled")], vec![]),
        T::component("TextField", &[("value", "$^title")], vec![]),
    ])
}

fn app_with(config: RuntimeConfig) -> Application {
    let app = Application::new(config);
    app.register(host_class()).unwrap();
    app.register(card_class()).unwrap();
    app.register_static("Settings", json!({"theme": "dark"}));
    app
}

fn app() -> Application {
    app_with(RuntimeConfig::default())
}

fn host_frame(app: &Application) -> Frame {
    let host = Host {
        title: "hello".to_string(),
        count: 3,
        flag: false,
        profile: json!({"name": "Ada", "langs": ["en"]}),
    };
    Frame::detached(Box::new(host), app.definition("Host").unwrap())
}

fn parse(app: &Application, attribute: &str) -> Binding {
    Binding::parse(attribute, &app.parse_env()).unwrap()
}

#[test]
fn test_keypath_reads_and_writes_back() {
    let app = app();
    let env = Environment::new(app.clone(), Request::new("s"));
    let mut frames = vec![host_frame(&app)];

    let name = parse(&app, "$profile.name");
    let mut scope = Scope::new(&mut frames, &env);
    assert_eq!(name.value(&mut scope).unwrap(), json!("Ada"));
    assert!(name.is_settable(&scope));
    name.set_value(json!("Grace"), &mut scope).unwrap();
    assert_eq!(name.value(&mut scope).unwrap(), json!("Grace"));

    let host = frames[0].downcast_mut::<Host>().unwrap();
    assert_eq!(host.profile["langs"], json!(["en"]));
    assert_eq!(host.profile["name"], json!("Grace"));
}

#[test]
fn test_unknown_key_is_an_error() {
    let app = app();
    let env = Environment::new(app.clone(), Request::new("s"));
    let mut frames = vec![host_frame(&app)];
    let mut scope = Scope::new(&mut frames, &env);
    let err = parse(&app, "$missing").value(&mut scope).unwrap_err();
    assert!(matches!(err, RuntimeError::Binding(_)), "unexpected error: {}", err);
}

#[test]
fn test_negation_inverts_writes() {
    let app = app();
    let env = Environment::new(app.clone(), Request::new("s"));
    let mut frames = vec![host_frame(&app)];
    let mut scope = Scope::new(&mut frames, &env);

    let negated = parse(&app, "$!flag");
    assert_eq!(negated.value(&mut scope).unwrap(), json!(true));
    negated.set_value(json!(true), &mut scope).unwrap();
    assert_eq!(parse(&app, "$flag").value(&mut scope).unwrap(), json!(false));
    negated.set_value(json!(false), &mut scope).unwrap();
    assert_eq!(parse(&app, "$flag").value(&mut scope).unwrap(), json!(true));
}

#[test]
fn test_constants_reject_writes() {
    let app = app();
    let env = Environment::new(app.clone(), Request::new("s"));
    let mut frames = vec![host_frame(&app)];
    let mut scope = Scope::new(&mut frames, &env);

    for attribute in ["$true", "plain text", "$(1, 2)", "$[greeting]Hi", "${count + 1}"] {
        let binding = parse(&app, attribute);
        assert!(!binding.is_settable(&scope), "{} should not be settable", attribute);
        assert!(
            binding.set_value(json!(1), &mut scope).is_err(),
            "{} accepted a write",
            attribute
        );
    }
    assert!(parse(&app, "$true").is_constant());
    assert_eq!(parse(&app, "plain text").description(), "plain text");
}

#[test]
fn test_default_applies_to_null_only() {
    let app = app();
    let env = Environment::new(app.clone(), Request::new("s"));
    let mut frames = vec![host_frame(&app)];
    let mut scope = Scope::new(&mut frames, &env);

    assert_eq!(parse(&app, "$nickname:anon").value(&mut scope).unwrap(), json!("anon"));
    assert_eq!(
        parse(&app, "$nickname|uppercase:anon").value(&mut scope).unwrap(),
        json!("anon")
    );
    assert_eq!(parse(&app, "$title:anon").value(&mut scope).unwrap(), json!("hello"));
    assert_eq!(parse(&app, "$title|uppercase").value(&mut scope).unwrap(), json!("HELLO"));
}

#[test]
fn test_formatter_parse_failure_records_field_error() {
    let app = app();
    let env = Environment::new(app.clone(), Request::new("s"));
    let mut frames = vec![host_frame(&app)];
    let mut scope = Scope::new(&mut frames, &env);

    let formatted = parse(&app, "$count|integer");
    formatted.set_value(json!("12"), &mut scope).unwrap();
    assert_eq!(parse(&app, "$count").value(&mut scope).unwrap(), json!(12));

    formatted.set_value(json!("twelve"), &mut scope).unwrap();
    assert_eq!(parse(&app, "$count").value(&mut scope).unwrap(), json!(12));
    let errors = env.field_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].key, "count");
    assert_eq!(errors[0].value.as_deref(), Some("twelve"));
}

#[test]
fn test_class_accessor_reads_and_writes() {
    let app = app();
    let env = Environment::new(app.clone(), Request::new("s"));
    let mut frames = vec![host_frame(&app)];
    let mut scope = Scope::new(&mut frames, &env);

    let theme = parse(&app, "$Settings.theme");
    assert!(matches!(theme, Binding::Static { .. }));
    assert_eq!(theme.value(&mut scope).unwrap(), json!("dark"));
    theme.set_value(json!("light"), &mut scope).unwrap();
    assert_eq!(app.static_value("Settings"), Some(json!({"theme": "light"})));
}

#[test]
fn test_expression_reads_context_keys() {
    let app = app();
    let env = Environment::new(app.clone(), Request::new("s"));
    let mut frames = vec![host_frame(&app)];
    let mut scope = Scope::new(&mut frames, &env);

    let doubled = parse(&app, "${count * 2}");
    assert_eq!(doubled.value(&mut scope).unwrap().as_f64(), Some(6.0));

    let label = parse(&app, "${count > 2 ? title : 'small'}");
    assert_eq!(label.value(&mut scope).unwrap(), json!("hello"));
}

#[test]
fn test_dynamic_constant_resolves_once() {
    let app = app();
    let env = Environment::new(app.clone(), Request::new("s"));
    let mut frames = vec![host_frame(&app)];

    let frozen = parse(&app, "$=count");
    assert!(!frozen.is_constant());
    {
        let mut scope = Scope::new(&mut frames, &env);
        assert_eq!(frozen.value(&mut scope).unwrap(), json!(3));
    }
    frames[0].downcast_mut::<Host>().unwrap().count = 9;
    let mut scope = Scope::new(&mut frames, &env);
    assert_eq!(frozen.value(&mut scope).unwrap(), json!(3));
    assert!(frozen.is_constant());
}

fn localized_app(markers: bool) -> Application {
    let app = app_with(RuntimeConfig {
        localization_markers: markers,
        ..RuntimeConfig::default()
    });
    let mut tables = StringTables::new();
    tables.insert("en", "Host", "greeting", "Hello there");
    tables.insert("fr", "Host", "greeting", "Bonjour");
    app.set_localization(Arc::new(tables));
    app
}

#[test]
fn test_localized_lookup_is_memoized_per_locale() {
    let app = localized_app(false);
    let greeting = parse(&app, "$[greeting:shown on top]Hi");
    let farewell = parse(&app, "$[farewell]Bye");

    let english = Environment::new(app.clone(), Request::new("s"));
    let mut frames = vec![host_frame(&app)];
    let mut scope = Scope::new(&mut frames, &english);
    assert_eq!(greeting.value(&mut scope).unwrap(), json!("Hello there"));
    assert_eq!(greeting.value(&mut scope).unwrap(), json!("Hello there"));
    assert_eq!(farewell.value(&mut scope).unwrap(), json!("Bye"));

    let french = Environment::new(app.clone(), Request::new("s").locale("fr"));
    let mut frames = vec![host_frame(&app)];
    let mut scope = Scope::new(&mut frames, &french);
    assert_eq!(greeting.value(&mut scope).unwrap(), json!("Bonjour"));

    match &greeting {
        Binding::Localized { memo, .. } => assert_eq!(memo.len(), 2),
        other => panic!("expected a localized binding, got {:?}", other.description()),
    }
}

#[test]
fn test_localized_markers() {
    let app = localized_app(true);
    let env = Environment::new(app.clone(), Request::new("s"));
    let mut frames = vec![host_frame(&app)];
    let mut scope = Scope::new(&mut frames, &env);
    assert_eq!(
        parse(&app, "$[greeting]Hi").value(&mut scope).unwrap(),
        json!("<!--l10n:greeting-->Hello there<!--/l10n-->")
    );
}

#[test]
fn test_parent_delegation_through_exchange() {
    let app = app();
    let opened = app.handle(Request::new("s").open("Host")).unwrap();
    assert_eq!(
        opened.content,
        "<input type=\"text\" name=\"1.2\" value=\"\">untitled<input type=\"text\" name=\"2.2\" value=\"\">"
    );

    let response = app
        .handle(
            Request::new("s")
                .page(opened.page_id)
                .value(&"1.2".parse().unwrap(), "World")
                .value(&"2.2".parse().unwrap(), "ignored"),
        )
        .unwrap();
    assert_eq!(
        response.content,
        "World<input type=\"text\" name=\"1.2\" value=\"World\">untitled<input type=\"text\" name=\"2.2\" value=\"\">"
    );
    assert!(response.field_errors.is_empty());
}

#[test]
fn test_debug_value_follows_delegation() {
    let app = app();
    let env = Environment::new(app.clone(), Request::new("s"));
    let mut frames = vec![host_frame(&app)];
    let mut scope = Scope::new(&mut frames, &env);

    let delegated = parse(&app, "$^title:untitled");
    assert!(!delegated.binding_exists(&scope));
    assert!(delegated.debug_value(&mut scope).contains("default"));
    assert_eq!(parse(&app, "$title").debug_value(&mut scope), "$title = \"hello\"");
}
