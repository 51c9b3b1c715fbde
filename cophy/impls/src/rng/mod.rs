mod std;

pub use self::std::StdRng;
