use stempel::Injector;

fn injector() -> Injector {
    Injector::new("token", "confirm-action").unwrap()
}

#[test]
fn stamps_post_form() {
    let html = r#"<form method="POST">
        <input name="title"/>
    </form>"#;

    let stamped = injector().inject(html, "VALUE").unwrap();

    assert!(stamped.starts_with(
        r#"<form method="POST"><input type="hidden" name="token" value="VALUE"/>"#
    ));
    assert_eq!(stamped.matches("name=\"token\"").count(), 1);
}

#[test]
fn leaves_get_form_alone() {
    let html = r#"<form method="get"><input name="q"/></form>"#;
    assert_eq!(injector().inject(html, "VALUE").unwrap(), html);
}

#[test]
fn stamps_confirm_link_either_attribute_order() {
    let marker_first = r#"<a data-module="confirm-action" href="/dataset/delete">Delete</a>"#;
    let href_first = r#"<a href="/dataset/delete" data-module="confirm-action">Delete</a>"#;

    for html in [marker_first, href_first] {
        let stamped = injector().inject(html, "VALUE").unwrap();
        assert!(
            stamped.contains(r#"href="/dataset/delete?token=VALUE""#),
            "missing token in {stamped}"
        );
    }
}

#[test]
fn appends_with_ampersand_when_query_present() {
    let html = r#"<a data-module="confirm-action" href="/delete?id=42">x</a>"#;
    let stamped = injector().inject(html, "VALUE").unwrap();

    assert!(stamped.contains(r#"href="/delete?id=42&token=VALUE""#));
}

#[test]
fn keeps_existing_token_parameter() {
    let html = r#"<a data-module="confirm-action" href="/delete?token=OLD">x</a>"#;
    assert_eq!(injector().inject(html, "NEW").unwrap(), html);
}

#[test]
fn ignores_lookalike_parameter_names() {
    let html = r#"<a data-module="confirm-action" href="/delete?xtoken=OLD">x</a>"#;
    let stamped = injector().inject(html, "NEW").unwrap();

    assert!(stamped.contains(r#"href="/delete?xtoken=OLD&token=NEW""#));
}

#[test]
fn ignores_unmarked_links() {
    let html = r#"<a href="/dataset/delete">Delete</a>"#;
    assert_eq!(injector().inject(html, "VALUE").unwrap(), html);
}

#[test]
fn stamp_is_idempotent() {
    let injector = injector();
    let html = r#"<main>
        <form method="post"><input name="title"/></form>
        <form METHOD="Post"></form>
        <a data-module="confirm-action" href="/delete?id=1">one</a>
        <a href="/delete?id=2" data-module="confirm-action">two</a>
    </main>"#;

    let once = injector.inject(html, "VALUE").unwrap();
    let twice = injector.inject(&once, "VALUE").unwrap();

    assert_eq!(once, twice);
    assert_eq!(once.matches("name=\"token\"").count(), 2);
}

#[test]
fn restamping_replaces_the_field_value() {
    let injector = injector();
    let html = r#"<form method="post"><input name="title"/></form>"#;

    let first = injector.inject(html, "FIRST").unwrap();
    let second = injector.inject(&first, "SECOND").unwrap();

    assert!(!second.contains("FIRST"));
    assert_eq!(second.matches("name=\"token\"").count(), 1);
}

#[test]
fn works_on_minified_markup() {
    // no whitespace after the opening tag anywhere
    let html = r#"<form method="post"><input name="a"/></form><form method="post"></form>"#;

    let once = injector().inject(html, "VALUE").unwrap();
    let twice = injector().inject(&once, "VALUE").unwrap();

    assert_eq!(once.matches("name=\"token\"").count(), 2);
    assert_eq!(once, twice);
}

#[test]
fn escapes_the_stamped_value() {
    let html = r#"<form method="post"></form>"#;
    let stamped = injector().inject(html, r#""><script>"#).unwrap();

    assert!(!stamped.contains("<script>"));
    assert!(stamped.contains("&quot;>&lt;script>"));
}
