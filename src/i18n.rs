// ==========================================
// 国际化 (i18n) 模块
// ==========================================
// 使用 rust-i18n 库
// 支持法语（默认）和英语，用于通知模板
// ==========================================
// 注意: rust_i18n::i18n! 宏已在 lib.rs 中初始化
// ==========================================

/// 获取当前语言
pub fn current_locale() -> String {
    rust_i18n::locale().to_string()
}

/// 设置语言
///
/// # 参数
/// - locale: 语言代码（"fr" 或 "en"）
pub fn set_locale(locale: &str) {
    rust_i18n::set_locale(locale);
}

/// 翻译消息（无参数）
pub fn t(key: &str) -> String {
    rust_i18n::t!(key).to_string()
}

/// 翻译消息（带参数）
///
/// 占位符格式: `%{name}`
///
/// # 示例
/// ```no_run
/// use mandate_ledger::i18n::t_with_args;
/// let subject = t_with_args("notify.mandate_expired.subject", &[("code", "460 M 25")]);
/// ```
pub fn t_with_args(key: &str, args: &[(&str, &str)]) -> String {
    let mut result = rust_i18n::t!(key).to_string();
    for (k, v) in args {
        let placeholder = format!("%{{{}}}", k);
        result = result.replace(&placeholder, v);
    }
    result
}

/// 按指定语言翻译（不修改全局 locale）
///
/// 通知渲染使用，避免并发发送时互相影响
pub fn t_in(locale: &str, key: &str, args: &[(&str, &str)]) -> String {
    let mut result = rust_i18n::t!(key, locale = locale).to_string();
    for (k, v) in args {
        let placeholder = format!("%{{{}}}", k);
        result = result.replace(&placeholder, v);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // rust-i18n 的 locale 为全局状态，且 Rust 测试默认并行执行；
    // 为避免测试互相干扰，这里对 i18n 相关测试串行化。
    static LOCALE_TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_set_locale() {
        let _guard = LOCALE_TEST_LOCK.lock().unwrap();
        set_locale("en");
        assert_eq!(current_locale(), "en");

        set_locale("fr");
        assert_eq!(current_locale(), "fr");
    }

    #[test]
    fn test_translate_with_args() {
        let _guard = LOCALE_TEST_LOCK.lock().unwrap();
        set_locale("fr");
        let msg = t_with_args("notify.mandate_expired.subject", &[("code", "460 M 25")]);
        assert_eq!(msg, "Numéro 460 M 25 récupéré");

        set_locale("en");
        let msg = t_with_args("notify.mandate_expired.subject", &[("code", "460 M 25")]);
        assert_eq!(msg, "Number 460 M 25 released");

        set_locale("fr");
    }

    #[test]
    fn test_translate_in_explicit_locale() {
        let msg = t_in("en", "notify.greeting", &[("name", "Jean")]);
        assert_eq!(msg, "Hello Jean,");
        let msg = t_in("fr", "notify.greeting", &[("name", "Jean")]);
        assert_eq!(msg, "Bonjour Jean,");
    }
}
