#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Presence {
        attr: String,
    },
    /// `pattern` is the filter value with every `*` removed, lower-cased.
    Substring {
        attr: String,
        pattern: String,
    },
    /// `value` is `None` when the filter value was not an integer; such a
    /// comparison never matches.
    Compare {
        attr: String,
        op: CompareOp,
        value: Option<i64>,
    },
    Equality {
        attr: String,
        value: String,
    },
}

impl Filter {
    /// The filter an empty filter string stands for.
    pub fn match_all() -> Self {
        Filter::And(Vec::new())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Gt,
    Lt,
    Ge,
    Le,
}

impl CompareOp {
    pub fn apply(self, left: i64, right: i64) -> bool {
        match self {
            CompareOp::Gt => left > right,
            CompareOp::Lt => left < right,
            CompareOp::Ge => left >= right,
            CompareOp::Le => left <= right,
        }
    }
}
