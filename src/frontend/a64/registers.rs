use crate::frontend::{RegFilter, RegType};

pub const FLAGS: &str = "flags";
pub const SP: &str = "sp";

const CONDITIONS: [&str; 14] = [
    "eq", "ne", "cs", "cc", "mi", "pl", "vs", "vc", "hi", "ls", "ge", "lt", "gt", "le",
];

fn numbered(prefix: char, name: &str, max: usize) -> bool {
    name.strip_prefix(prefix)
        .filter(|n| !n.is_empty() && (n.len() == 1 || !n.starts_with('0')))
        .and_then(|n| n.parse::<usize>().ok())
        .map_or(false, |n| n <= max)
}

pub fn find_type(name: &str) -> Option<RegType> {
    if name == SP || numbered('x', name, 30) {
        Some(RegType::Gpr)
    } else if numbered('v', name, 31) {
        Some(RegType::Vector)
    } else if name == FLAGS {
        Some(RegType::Flags)
    } else {
        None
    }
}

pub fn is_condition(name: &str) -> bool {
    CONDITIONS.contains(&name)
}

pub fn list(ty: RegType, filter: RegFilter) -> Vec<String> {
    match ty {
        RegType::Gpr => {
            let mut regs: Vec<String> = (0..=30)
                .filter(|&n| match filter {
                    RegFilter::All => true,
                    RegFilter::Normal => n <= 17,
                    RegFilter::Extra => (19..=28).contains(&n),
                })
                .map(|n| format!("x{}", n))
                .collect();
            if filter == RegFilter::All {
                regs.push(SP.to_string());
            }
            regs
        }
        RegType::Vector => (0..=31)
            .filter(|&n| match filter {
                RegFilter::All => true,
                RegFilter::Normal => !(8..=15).contains(&n),
                RegFilter::Extra => (8..=15).contains(&n),
            })
            .map(|n| format!("v{}", n))
            .collect(),
        RegType::Flags => match filter {
            RegFilter::Extra => Vec::new(),
            _ => vec![FLAGS.to_string()],
        },
    }
}

/// Register pairs `(vN, vN+1)` accepted by two-register structure loads
pub fn consecutive_vector_pairs() -> Vec<Vec<String>> {
    (0..31)
        .map(|n| vec![format!("v{}", n), format!("v{}", n + 1)])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_find_type() {
        assert_eq!(find_type("x0"), Some(RegType::Gpr));
        assert_eq!(find_type("x30"), Some(RegType::Gpr));
        assert_eq!(find_type("sp"), Some(RegType::Gpr));
        assert_eq!(find_type("v31"), Some(RegType::Vector));
        assert_eq!(find_type("flags"), Some(RegType::Flags));
        assert_eq!(find_type("x31"), None);
        assert_eq!(find_type("x01"), None);
        assert_eq!(find_type("xtmp"), None);
        assert_eq!(find_type("acc"), None);
    }

    #[test]
    fn test_register_classes() {
        assert_eq!(list(RegType::Gpr, RegFilter::All).len(), 32);
        assert_eq!(list(RegType::Gpr, RegFilter::Normal).len(), 18);
        assert_eq!(list(RegType::Gpr, RegFilter::Extra).len(), 10);
        assert_eq!(list(RegType::Vector, RegFilter::Extra).len(), 8);
        assert_eq!(consecutive_vector_pairs()[3], vec!["v3", "v4"]);
    }
}
