//! The term language of assertions: Boolean structure over atoms, where atoms
//! are Boolean variables or linear-arithmetic relations. Terms are hash-consed
//! in a [`TermDatabase`]; equal terms always receive the same [`Term`] handle,
//! which is what makes variable creation idempotent further down.

use fnv::FnvHashMap;
use num_bigint::BigInt;
use num_rational::BigRational;

/// The sorts terms can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sort {
    Bool,
    Integer,
    Real,
}

impl Sort {
    pub fn is_arithmetic(self) -> bool {
        matches!(self, Sort::Integer | Sort::Real)
    }
}

/// A handle to a term in a [`TermDatabase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Term(u32);

impl Term {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// The shape of a term.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TermData {
    True,
    False,
    /// A free variable of the given sort.
    Variable(Sort, String),
    /// A rational constant.
    Constant(BigRational),
    Plus(Vec<Term>),
    Minus(Term, Term),
    UnaryMinus(Term),
    /// Multiplication of a term by a constant. General products are not part
    /// of the language.
    Mult(BigRational, Term),
    Gt(Term, Term),
    Geq(Term, Term),
    Lt(Term, Term),
    Leq(Term, Term),
    Equal(Term, Term),
    Not(Term),
    And(Vec<Term>),
    Or(Vec<Term>),
}

/// Hash-consing store of terms.
///
/// Constructors normalise a few shapes so that the rest of the solver only
/// ever sees a small language: `a != b` is stored as `not (a = b)`, and
/// `a -> b` as `(not a) or b`.
#[derive(Debug, Default)]
pub struct TermDatabase {
    terms: Vec<TermData>,
    term_ids: FnvHashMap<TermData, Term>,
}

impl TermDatabase {
    fn intern(&mut self, data: TermData) -> Term {
        if let Some(term) = self.term_ids.get(&data) {
            return *term;
        }
        let term = Term(self.terms.len() as u32);
        self.terms.push(data.clone());
        let _ = self.term_ids.insert(data, term);
        term
    }

    pub(crate) fn data(&self, term: Term) -> &TermData {
        &self.terms[term.index()]
    }

    /// The sort of a term. Arithmetic terms are `Integer` only when every
    /// part is integral.
    pub fn sort(&self, term: Term) -> Sort {
        match self.data(term) {
            TermData::True | TermData::False => Sort::Bool,
            TermData::Variable(sort, _) => *sort,
            TermData::Constant(value) => {
                if value.is_integer() {
                    Sort::Integer
                } else {
                    Sort::Real
                }
            }
            TermData::Plus(terms) => self.join_arithmetic_sorts(terms),
            TermData::Minus(lhs, rhs) => self.join_arithmetic_sorts(&[*lhs, *rhs]),
            TermData::UnaryMinus(inner) => self.sort(*inner),
            TermData::Mult(coefficient, inner) => {
                if coefficient.is_integer() && self.sort(*inner) == Sort::Integer {
                    Sort::Integer
                } else {
                    Sort::Real
                }
            }
            TermData::Gt(_, _)
            | TermData::Geq(_, _)
            | TermData::Lt(_, _)
            | TermData::Leq(_, _)
            | TermData::Equal(_, _)
            | TermData::Not(_)
            | TermData::And(_)
            | TermData::Or(_) => Sort::Bool,
        }
    }

    fn join_arithmetic_sorts(&self, terms: &[Term]) -> Sort {
        if terms.iter().all(|term| self.sort(*term) == Sort::Integer) {
            Sort::Integer
        } else {
            Sort::Real
        }
    }

    pub fn true_term(&mut self) -> Term {
        self.intern(TermData::True)
    }

    pub fn false_term(&mut self) -> Term {
        self.intern(TermData::False)
    }

    pub fn boolean_variable(&mut self, name: &str) -> Term {
        self.intern(TermData::Variable(Sort::Bool, name.to_owned()))
    }

    pub fn integer_variable(&mut self, name: &str) -> Term {
        self.intern(TermData::Variable(Sort::Integer, name.to_owned()))
    }

    pub fn real_variable(&mut self, name: &str) -> Term {
        self.intern(TermData::Variable(Sort::Real, name.to_owned()))
    }

    pub fn constant(&mut self, value: BigRational) -> Term {
        self.intern(TermData::Constant(value))
    }

    pub fn integer_constant(&mut self, value: i64) -> Term {
        self.constant(BigRational::from_integer(BigInt::from(value)))
    }

    pub fn plus(&mut self, terms: Vec<Term>) -> Term {
        self.intern(TermData::Plus(terms))
    }

    pub fn minus(&mut self, lhs: Term, rhs: Term) -> Term {
        self.intern(TermData::Minus(lhs, rhs))
    }

    pub fn unary_minus(&mut self, inner: Term) -> Term {
        self.intern(TermData::UnaryMinus(inner))
    }

    pub fn mult(&mut self, coefficient: BigRational, inner: Term) -> Term {
        self.intern(TermData::Mult(coefficient, inner))
    }

    pub fn gt(&mut self, lhs: Term, rhs: Term) -> Term {
        self.intern(TermData::Gt(lhs, rhs))
    }

    pub fn geq(&mut self, lhs: Term, rhs: Term) -> Term {
        self.intern(TermData::Geq(lhs, rhs))
    }

    pub fn lt(&mut self, lhs: Term, rhs: Term) -> Term {
        self.intern(TermData::Lt(lhs, rhs))
    }

    pub fn leq(&mut self, lhs: Term, rhs: Term) -> Term {
        self.intern(TermData::Leq(lhs, rhs))
    }

    pub fn equal(&mut self, lhs: Term, rhs: Term) -> Term {
        self.intern(TermData::Equal(lhs, rhs))
    }

    /// `a != b`, stored as `not (a = b)`.
    pub fn not_equal(&mut self, lhs: Term, rhs: Term) -> Term {
        let equality = self.equal(lhs, rhs);
        self.not(equality)
    }

    /// Negation; `not (not t)` collapses to `t`.
    pub fn not(&mut self, inner: Term) -> Term {
        if let TermData::Not(doubly_negated) = self.data(inner) {
            return *doubly_negated;
        }
        self.intern(TermData::Not(inner))
    }

    pub fn and(&mut self, terms: Vec<Term>) -> Term {
        self.intern(TermData::And(terms))
    }

    pub fn or(&mut self, terms: Vec<Term>) -> Term {
        self.intern(TermData::Or(terms))
    }

    /// `a -> b`, stored as `(not a) or b`.
    pub fn implies(&mut self, antecedent: Term, consequent: Term) -> Term {
        let negated = self.not(antecedent);
        self.or(vec![negated, consequent])
    }

    /// Is this term an arithmetic relation, i.e. an atom the linear
    /// arithmetic plugin may be interested in?
    pub(crate) fn is_arithmetic_relation(&self, term: Term) -> bool {
        match self.data(term) {
            TermData::Gt(lhs, _)
            | TermData::Geq(lhs, _)
            | TermData::Lt(lhs, _)
            | TermData::Leq(lhs, _)
            | TermData::Equal(lhs, _) => self.sort(*lhs).is_arithmetic(),
            _ => false,
        }
    }
}
