//! Shorthand-to-canonical command alias table.
//!
//! Expansion happens before pattern matching so a rule written against
//! `npm install` also catches `npm i`.

/// Ordered alias table. First element is the shorthand prefix, second the
/// canonical form it expands to.
const ALIASES: &[(&str, &str)] = &[
    ("npm i", "npm install"),
    ("npm un", "npm uninstall"),
    ("npm r", "npm uninstall"),
    ("npm rm", "npm uninstall"),
    ("pnpm i", "pnpm install"),
    ("pnpm rm", "pnpm remove"),
    ("yarn rm", "yarn remove"),
    ("git co", "git checkout"),
    ("git br", "git branch"),
    ("git ci", "git commit"),
    ("git st", "git status"),
    ("pip3", "pip"),
];

/// Expand a normalized command into itself plus every canonical form an
/// alias produces. Order is stable: the original first, expansions after.
pub fn expand(command: &str) -> Vec<String> {
    let mut forms = vec![command.to_string()];
    for (short, canonical) in ALIASES {
        let expanded = if command == *short {
            Some((*canonical).to_string())
        } else if let Some(rest) = command.strip_prefix(&format!("{short} ")) {
            Some(format!("{canonical} {rest}"))
        } else {
            None
        };
        if let Some(expanded) = expanded
            && !forms.contains(&expanded)
        {
            forms.push(expanded);
        }
    }
    forms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_npm_install_shorthand() {
        let forms = expand("npm i lodash");
        assert_eq!(forms[0], "npm i lodash");
        assert!(forms.contains(&"npm install lodash".to_string()));
    }

    #[test]
    fn expands_bare_alias() {
        let forms = expand("git co");
        assert!(forms.contains(&"git checkout".to_string()));
    }

    #[test]
    fn leaves_unknown_commands_alone() {
        assert_eq!(expand("cargo build"), vec!["cargo build".to_string()]);
    }

    #[test]
    fn does_not_expand_mid_word() {
        // "npm init" must not expand via the "npm i" shorthand.
        let forms = expand("npm init");
        assert_eq!(forms, vec!["npm init".to_string()]);
    }
}
