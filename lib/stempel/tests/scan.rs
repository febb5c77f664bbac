use stempel::Injector;

fn injector() -> Injector {
    Injector::new("token", "confirm-action").unwrap()
}

#[test]
fn spots_post_forms() {
    let html = r#"<div><form method="post"></form></div>"#;
    assert!(injector().contains_targets(html).unwrap());
}

#[test]
fn spots_confirm_links() {
    let html = r#"<a data-module="confirm-action" href="/delete">x</a>"#;
    assert!(injector().contains_targets(html).unwrap());
}

#[test]
fn ignores_plain_pages() {
    let html = r#"<main>
        <form method="get"><input name="q"/></form>
        <a href="/dataset/delete">Delete</a>
    </main>"#;

    assert!(!injector().contains_targets(html).unwrap());
}

#[test]
fn ignores_empty_documents() {
    assert!(!injector().contains_targets("").unwrap());
}
