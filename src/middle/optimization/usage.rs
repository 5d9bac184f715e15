use hashbrown::HashMap;

use crate::{frontend::intern::Symbol, middle::ssa::FunctionBody};

/// Number of places reading each variable: instruction inputs, phi sources
/// included, and the output list of the function
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageMap {
    counts: HashMap<Symbol, usize>,
}

impl UsageMap {
    pub fn build(body: &FunctionBody) -> Self {
        let mut counts = HashMap::new();

        let reads = body
            .instructions()
            .flat_map(|(_, instruction)| instruction.inputs())
            .chain(body.outputs.iter().copied());

        for variable in reads {
            *counts.entry(variable).or_default() += 1;
        }

        Self { counts }
    }

    pub fn usage_count(&self, variable: Symbol) -> usize {
        self.counts.get(&variable).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::frontend::{SourceFile, parser::Parser};

    #[test]
    fn counts_every_read() {
        let module = Parser::parse_module(&SourceFile::from_memory(indoc! {"
            function [y] = f(n: int32)
            #0:
                y0 = !undefined
                one = 1
                for i = one, one, n, #1, #2
            #1:
                y1 = phi #0:y0, #1:y2
                y2 = set y1(i), i
            #2:
                y = phi #0:y0, #1:y2
            end
        "}))
        .unwrap();
        let usage = UsageMap::build(&module.functions[0]);

        let count = |name| usage.usage_count(Symbol::new(name));
        assert_eq!(count("y0"), 2);
        assert_eq!(count("y1"), 1);
        assert_eq!(count("y2"), 2);
        assert_eq!(count("i"), 2);
        assert_eq!(count("one"), 2);
        assert_eq!(count("y"), 1);
        assert_eq!(count("unused"), 0);
    }
}
