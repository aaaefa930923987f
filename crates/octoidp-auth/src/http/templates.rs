//! HTML rendered by the identity provider itself.
//!
//! Only two pages exist: the local error page for authorize requests whose
//! redirect target is not trusted, and the auto-submitting form of the
//! `form_post` response mode. Login and consent pages belong to the host.

const STYLES: &str = r#"
body { font-family: system-ui, sans-serif; background: #f5f6f8; color: #1f2430; margin: 0; }
.container { max-width: 480px; margin: 10vh auto; padding: 0 16px; }
.card { background: #fff; border-radius: 8px; padding: 32px; box-shadow: 0 1px 3px rgba(0,0,0,.12); }
.error-title { font-size: 20px; font-weight: 600; margin-bottom: 12px; }
.error-description { margin-bottom: 16px; }
.error-code { font-family: monospace; color: #6b7280; }
"#;

fn html_page(site_name: &str, title: &str, body_attributes: &str, content: &str) -> String {
    let mut html = String::with_capacity(content.len() + 1024);
    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    html.push_str("    <meta charset=\"UTF-8\">\n");
    html.push_str(
        "    <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n",
    );
    html.push_str("    <title>");
    html.push_str(&html_escape(title));
    html.push_str(" - ");
    html.push_str(&html_escape(site_name));
    html.push_str("</title>\n    <style>");
    html.push_str(STYLES);
    html.push_str("</style>\n</head>\n<body");
    html.push_str(body_attributes);
    html.push_str(">\n    <div class=\"container\">\n");
    html.push_str(content);
    html.push_str("\n    </div>\n</body>\n</html>");
    html
}

/// Renders the error page for authorize requests that cannot be redirected.
#[must_use]
pub fn render_error_page(site_name: &str, error_code: &str, error_description: &str) -> String {
    let mut content = String::with_capacity(512);
    content.push_str("<div class=\"card\">\n");
    content.push_str("<div class=\"error-title\">Authorization Error</div>\n");
    if !error_description.is_empty() {
        content.push_str("<div class=\"error-description\">");
        content.push_str(&html_escape(error_description));
        content.push_str("</div>\n");
    }
    content.push_str("<div class=\"error-code\">");
    content.push_str(&html_escape(error_code));
    content.push_str("</div>\n</div>");

    html_page(site_name, "Error", "", &content)
}

/// Renders a form that posts `parameters` to `redirect_uri` on load.
#[must_use]
pub fn render_form_post(
    site_name: &str,
    redirect_uri: &str,
    parameters: &[(&'static str, String)],
) -> String {
    let mut content = String::with_capacity(512);
    content.push_str("<form method=\"post\" action=\"");
    content.push_str(&html_escape(redirect_uri));
    content.push_str("\">\n");
    for (name, value) in parameters {
        content.push_str("<input type=\"hidden\" name=\"");
        content.push_str(&html_escape(name));
        content.push_str("\" value=\"");
        content.push_str(&html_escape(value));
        content.push_str("\">\n");
    }
    content.push_str("<noscript><button type=\"submit\">Continue</button></noscript>\n</form>");

    html_page(
        site_name,
        "Submit",
        " onload=\"document.forms[0].submit()\"",
        &content,
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_page_escapes_description() {
        let html = render_error_page("OctoIdP", "invalid_request", "<script>alert(1)</script>");
        assert!(html.contains("&lt;script&gt;alert(1)&lt;/script&gt;"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("invalid_request"));
        assert!(html.contains("Error - OctoIdP"));
    }

    #[test]
    fn test_form_post_carries_parameters() {
        let html = render_form_post(
            "OctoIdP",
            "https://app.example.com/cb",
            &[("code", "abc".to_string()), ("state", "x\"y".to_string())],
        );
        assert!(html.contains("action=\"https://app.example.com/cb\""));
        assert!(html.contains("name=\"code\" value=\"abc\""));
        assert!(html.contains("name=\"state\" value=\"x&quot;y\""));
        assert!(html.contains("document.forms[0].submit()"));
    }
}
