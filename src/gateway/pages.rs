use axum::response::Html;

/// Index listing the entry points under `base_path`.
pub(super) fn index(base_path: &str) -> Html<String> {
    let base = escape(base_path);
    Html(format!(
        "<!doctype html><meta charset=\"utf-8\"><title>DingTalk SSO</title>\
         <p>DingTalk &rArr; ZenTao SSO is running.</p>\
         <ul>\
         <li>One-click login: <code>{base}/login</code></li>\
         <li>Scan-to-login ticket: <code>{base}/newticket</code>, \
         <code>{base}/status?ticket=&hellip;</code>, <code>{base}/complete?ticket=&hellip;</code></li>\
         </ul>"
    ))
}

/// Shown on the scanning device once its ticket is fulfilled.
pub(super) const AUTHORIZED: &str = r#"<!doctype html><meta charset="utf-8">
<meta name="viewport" content="width=device-width,initial-scale=1">
<title>Authorized</title>
<div style="font:16px/1.6 system-ui;padding:28px">
  <h2>Authorized</h2>
  <p>You can close this page and continue on your computer.</p>
  <p style="color:#64748b">If it does not close by itself, return to DingTalk manually.</p>
  <button id="closeBtn" style="padding:10px 14px;margin-top:12px;border-radius:10px;border:1px solid #e5e7eb">Close</button>
</div>
<script>
(function(){
  function tryClose(){ try{ if(window.dd){ dd.biz.navigation.close({}); } else { window.close(); } }catch(e){} }
  var s=document.createElement('script'); s.src='https://g.alicdn.com/dingding/open-develop/1.9.0/dingtalk.js';
  s.onload=function(){ tryClose(); setTimeout(tryClose, 800); };
  document.head.appendChild(s);
  setTimeout(tryClose, 2000);
  document.getElementById('closeBtn').onclick=tryClose;
})();
</script>"#;

pub(super) fn error_page(message: &str) -> Html<String> {
    Html(format!(
        "<!doctype html><meta charset=\"utf-8\">\
         <meta name=\"viewport\" content=\"width=device-width,initial-scale=1\">\
         <title>Login failed</title>\
         <div style=\"font:16px/1.6 system-ui;padding:28px\"><h2>Login failed</h2><p>{}</p></div>",
        escape(message)
    ))
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
